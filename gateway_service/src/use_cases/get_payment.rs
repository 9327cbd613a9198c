use std::sync::Arc;

use crate::domain::entities::{Payment, PaymentEvent};
use crate::domain::error::PaymentError;
use crate::domain::repository::PaymentRepository;
use crate::domain::types::{MerchantId, PaymentId};

/// Caso de uso: consultar el estado de un pago.
///
/// La variante autenticada verifica la propiedad del comercio y retorna
/// la factura completa; la variante pública (páginas de pago) expone
/// solo la fila sin verificación de dueño, para que el handler recorte
/// los campos sensibles.
pub struct GetPaymentUseCase {
    payment_repo: Arc<dyn PaymentRepository>,
}

impl GetPaymentUseCase {
    pub fn new(payment_repo: Arc<dyn PaymentRepository>) -> Self {
        Self { payment_repo }
    }

    pub async fn execute(
        &self,
        merchant_id: MerchantId,
        payment_id: PaymentId,
    ) -> Result<Payment, PaymentError> {
        let payment = self
            .payment_repo
            .find_by_id(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;

        // Un pago ajeno se reporta como inexistente
        if payment.merchant_id != merchant_id {
            return Err(PaymentError::NotFound(payment_id));
        }
        Ok(payment)
    }

    pub async fn execute_public(&self, payment_id: PaymentId) -> Result<Payment, PaymentError> {
        self.payment_repo
            .find_by_id(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))
    }

    pub async fn events(
        &self,
        merchant_id: MerchantId,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.execute(merchant_id, payment_id).await?;
        self.payment_repo.list_events(payment_id).await
    }
}
