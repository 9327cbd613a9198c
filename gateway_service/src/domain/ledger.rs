use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use common::{TokenAmount, TokenSymbol, VndAmount};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::LedgerError;
use crate::domain::types::{MerchantId, PaymentId, PayoutId};
pub use crate::domain::types::LedgerGroupId;

/// Moneda contable: el código VND o el símbolo de un token.
pub const CURRENCY_VND: &str = "VND";

/// Plan de cuentas tipado del gateway.
///
/// Las cuentas de comercio existen por par (comercio, tipo); las de
/// sistema son únicas. `key()` produce el identificador persistido.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerAccount {
    MerchantAvailable(MerchantId),
    MerchantPending(MerchantId),
    CryptoPool,
    FeeRevenue,
    EscrowLiability,
    FiatOutgoing,
}

impl LedgerAccount {
    pub fn key(&self) -> String {
        match self {
            LedgerAccount::MerchantAvailable(id) => format!("merchant:{}:available", id),
            LedgerAccount::MerchantPending(id) => format!("merchant:{}:pending", id),
            LedgerAccount::CryptoPool => "system:crypto_pool".to_string(),
            LedgerAccount::FeeRevenue => "system:fee_revenue".to_string(),
            LedgerAccount::EscrowLiability => "system:escrow_liability".to_string(),
            LedgerAccount::FiatOutgoing => "system:fiat_outgoing".to_string(),
        }
    }

    pub fn parse(key: &str) -> Result<Self, LedgerError> {
        match key {
            "system:crypto_pool" => return Ok(LedgerAccount::CryptoPool),
            "system:fee_revenue" => return Ok(LedgerAccount::FeeRevenue),
            "system:escrow_liability" => return Ok(LedgerAccount::EscrowLiability),
            "system:fiat_outgoing" => return Ok(LedgerAccount::FiatOutgoing),
            _ => {}
        }
        let mut parts = key.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("merchant"), Some(id), Some(kind), None) => {
                let id = MerchantId(
                    Uuid::parse_str(id)
                        .map_err(|_| LedgerError::AccountMissing(key.to_string()))?,
                );
                match kind {
                    "available" => Ok(LedgerAccount::MerchantAvailable(id)),
                    "pending" => Ok(LedgerAccount::MerchantPending(id)),
                    _ => Err(LedgerError::AccountMissing(key.to_string())),
                }
            }
            _ => Err(LedgerError::AccountMissing(key.to_string())),
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Sentido de una pata contable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "entry_direction", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryDirection {
    DEBIT,
    CREDIT,
}

/// Una pata (débito o crédito) dentro de un grupo contable.
///
/// `amount` siempre es un entero en unidades menores (VND) o unidades
/// base (token); la precisión fija viaja implícita en la moneda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingLeg {
    pub account: LedgerAccount,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub currency: String,
}

impl PostingLeg {
    pub fn debit(account: LedgerAccount, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account,
            direction: EntryDirection::DEBIT,
            amount,
            currency: currency.into(),
        }
    }

    pub fn credit(account: LedgerAccount, amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            account,
            direction: EntryDirection::CREDIT,
            amount,
            currency: currency.into(),
        }
    }
}

/// Asiento persistido e inmutable del diario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub group_id: LedgerGroupId,
    pub account_key: String,
    pub direction: EntryDirection,
    pub amount: Decimal,
    pub currency: String,
    pub payment_id: Option<PaymentId>,
    pub payout_id: Option<PayoutId>,
    pub posted_at: DateTime<Utc>,
}

/// Grupo contable balanceado, listo para postear atómicamente.
///
/// El constructor rechaza grupos donde Σdébitos ≠ Σcréditos por moneda,
/// patas con montos no positivos o fraccionarios. Una vez construido, el
/// grupo es inmutable; las correcciones son grupos adicionales.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingGroup {
    id: LedgerGroupId,
    legs: Vec<PostingLeg>,
    payment_id: Option<PaymentId>,
    payout_id: Option<PayoutId>,
}

impl PostingGroup {
    pub fn new(
        id: LedgerGroupId,
        legs: Vec<PostingLeg>,
        payment_id: Option<PaymentId>,
        payout_id: Option<PayoutId>,
    ) -> Result<Self, LedgerError> {
        if legs.len() < 2 {
            return Err(LedgerError::InvalidEntry(
                "A posting group needs at least two legs".to_string(),
            ));
        }

        let mut totals: HashMap<&str, (Decimal, Decimal)> = HashMap::new();
        for leg in &legs {
            if leg.amount <= Decimal::ZERO {
                return Err(LedgerError::InvalidEntry(format!(
                    "Leg amount must be positive, got {} {}",
                    leg.amount, leg.currency
                )));
            }
            if leg.amount.fract() != Decimal::ZERO {
                return Err(LedgerError::InvalidEntry(format!(
                    "Leg amount must be integral units, got {} {}",
                    leg.amount, leg.currency
                )));
            }
            let entry = totals.entry(leg.currency.as_str()).or_default();
            match leg.direction {
                EntryDirection::DEBIT => entry.0 += leg.amount,
                EntryDirection::CREDIT => entry.1 += leg.amount,
            }
        }

        for (currency, (debits, credits)) in totals {
            if debits != credits {
                return Err(LedgerError::Unbalanced {
                    currency: currency.to_string(),
                    debits,
                    credits,
                });
            }
        }

        Ok(Self {
            id,
            legs,
            payment_id,
            payout_id,
        })
    }

    pub fn id(&self) -> LedgerGroupId {
        self.id
    }

    pub fn legs(&self) -> &[PostingLeg] {
        &self.legs
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        self.payment_id
    }

    pub fn payout_id(&self) -> Option<PayoutId> {
        self.payout_id
    }

    /// Grupo canónico de reconocimiento de factura (CONFIRMING→COMPLETED).
    ///
    /// El cripto entrante se debita a `crypto_pool` contra
    /// `escrow_liability`; la conversión a VND a tasa bloqueada debita
    /// `escrow_liability` y acredita al comercio y a `fee_revenue`. Cada
    /// moneda balancea a cero dentro del grupo.
    pub fn invoice(
        group_id: LedgerGroupId,
        payment_id: PaymentId,
        merchant_id: MerchantId,
        crypto_amount: TokenAmount,
        token: &TokenSymbol,
        amount_vnd: VndAmount,
        fee_bps: u32,
        credit_pending_first: bool,
    ) -> Result<Self, LedgerError> {
        let (net, fee) = amount_vnd
            .split_fee_bps(fee_bps)
            .map_err(|e| LedgerError::InvalidEntry(e.to_string()))?;

        let merchant_account = if credit_pending_first {
            LedgerAccount::MerchantPending(merchant_id)
        } else {
            LedgerAccount::MerchantAvailable(merchant_id)
        };

        let crypto = crypto_amount.base_units_decimal();
        let currency = token.as_str().to_string();

        let mut legs = vec![
            PostingLeg::debit(LedgerAccount::CryptoPool, crypto, currency.clone()),
            PostingLeg::credit(LedgerAccount::EscrowLiability, crypto, currency),
            PostingLeg::debit(
                LedgerAccount::EscrowLiability,
                amount_vnd.to_decimal(),
                CURRENCY_VND,
            ),
            PostingLeg::credit(merchant_account, net.to_decimal(), CURRENCY_VND),
        ];
        if fee.minor_units() > 0 {
            legs.push(PostingLeg::credit(
                LedgerAccount::FeeRevenue,
                fee.to_decimal(),
                CURRENCY_VND,
            ));
        }

        Self::new(group_id, legs, Some(payment_id), None)
    }

    /// Libera fondos retenidos: `pending` → `available` del comercio.
    pub fn pending_release(
        group_id: LedgerGroupId,
        payment_id: PaymentId,
        merchant_id: MerchantId,
        amount: VndAmount,
    ) -> Result<Self, LedgerError> {
        Self::new(
            group_id,
            vec![
                PostingLeg::debit(
                    LedgerAccount::MerchantPending(merchant_id),
                    amount.to_decimal(),
                    CURRENCY_VND,
                ),
                PostingLeg::credit(
                    LedgerAccount::MerchantAvailable(merchant_id),
                    amount.to_decimal(),
                    CURRENCY_VND,
                ),
            ],
            Some(payment_id),
            None,
        )
    }

    /// Grupo de cierre de retiro: limpia `available` contra la cuenta de
    /// fiat saliente.
    pub fn payout(
        group_id: LedgerGroupId,
        payout_id: PayoutId,
        merchant_id: MerchantId,
        amount: VndAmount,
    ) -> Result<Self, LedgerError> {
        Self::new(
            group_id,
            vec![
                PostingLeg::debit(
                    LedgerAccount::MerchantAvailable(merchant_id),
                    amount.to_decimal(),
                    CURRENCY_VND,
                ),
                PostingLeg::credit(
                    LedgerAccount::FiatOutgoing,
                    amount.to_decimal(),
                    CURRENCY_VND,
                ),
            ],
            None,
            Some(payout_id),
        )
    }
}

/// Vista (available, pending) en VND de un comercio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantBalance {
    pub available: VndAmount,
    pub pending: VndAmount,
}

/// Discrepancia entre el saldo materializado y la proyección recalculada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationDelta {
    pub account_key: String,
    pub currency: String,
    pub stored: Decimal,
    pub computed: Decimal,
}

impl ReconciliationDelta {
    pub fn delta(&self) -> Decimal {
        self.stored - self.computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdt() -> TokenSymbol {
        TokenSymbol::new("USDT").unwrap()
    }

    #[test]
    fn test_account_key_roundtrip() {
        let merchant = MerchantId::new();
        for account in [
            LedgerAccount::MerchantAvailable(merchant),
            LedgerAccount::MerchantPending(merchant),
            LedgerAccount::CryptoPool,
            LedgerAccount::FeeRevenue,
            LedgerAccount::EscrowLiability,
            LedgerAccount::FiatOutgoing,
        ] {
            assert_eq!(LedgerAccount::parse(&account.key()).unwrap(), account);
        }
        assert!(LedgerAccount::parse("system:unknown").is_err());
        assert!(LedgerAccount::parse("merchant:not-a-uuid:available").is_err());
    }

    #[test]
    fn test_unbalanced_group_rejected() {
        let result = PostingGroup::new(
            LedgerGroupId::new(),
            vec![
                PostingLeg::debit(LedgerAccount::CryptoPool, Decimal::from(100), "USDT"),
                PostingLeg::credit(LedgerAccount::EscrowLiability, Decimal::from(99), "USDT"),
            ],
            None,
            None,
        );
        assert!(matches!(result, Err(LedgerError::Unbalanced { .. })));
    }

    #[test]
    fn test_cross_currency_legs_do_not_balance_each_other() {
        // 100 USDT debit cannot be compensated by a VND credit
        let result = PostingGroup::new(
            LedgerGroupId::new(),
            vec![
                PostingLeg::debit(LedgerAccount::CryptoPool, Decimal::from(100), "USDT"),
                PostingLeg::credit(
                    LedgerAccount::MerchantAvailable(MerchantId::new()),
                    Decimal::from(100),
                    CURRENCY_VND,
                ),
            ],
            None,
            None,
        );
        assert!(matches!(result, Err(LedgerError::Unbalanced { .. })));
    }

    #[test]
    fn test_non_positive_and_fractional_amounts_rejected() {
        let zero = PostingGroup::new(
            LedgerGroupId::new(),
            vec![
                PostingLeg::debit(LedgerAccount::CryptoPool, Decimal::ZERO, "USDT"),
                PostingLeg::credit(LedgerAccount::EscrowLiability, Decimal::ZERO, "USDT"),
            ],
            None,
            None,
        );
        assert!(matches!(zero, Err(LedgerError::InvalidEntry(_))));

        let fractional = PostingGroup::new(
            LedgerGroupId::new(),
            vec![
                PostingLeg::debit(
                    LedgerAccount::CryptoPool,
                    Decimal::from_str_exact("1.5").unwrap(),
                    "USDT",
                ),
                PostingLeg::credit(
                    LedgerAccount::EscrowLiability,
                    Decimal::from_str_exact("1.5").unwrap(),
                    "USDT",
                ),
            ],
            None,
            None,
        );
        assert!(matches!(fractional, Err(LedgerError::InvalidEntry(_))));
    }

    #[test]
    fn test_invoice_group_matches_seed_scenario() {
        // 2,300,000 VND invoice settled with 100 USDT, 1% fee
        let merchant = MerchantId::new();
        let group = PostingGroup::invoice(
            LedgerGroupId::new(),
            PaymentId::new(),
            merchant,
            TokenAmount::from_base_units(100_000_000, 6),
            &usdt(),
            VndAmount::new(2_300_000).unwrap(),
            100,
            false,
        )
        .unwrap();

        let legs = group.legs();
        assert!(legs.contains(&PostingLeg::debit(
            LedgerAccount::CryptoPool,
            Decimal::from(100_000_000),
            "USDT",
        )));
        assert!(legs.contains(&PostingLeg::credit(
            LedgerAccount::MerchantAvailable(merchant),
            Decimal::from(2_277_000),
            CURRENCY_VND,
        )));
        assert!(legs.contains(&PostingLeg::credit(
            LedgerAccount::FeeRevenue,
            Decimal::from(23_000),
            CURRENCY_VND,
        )));
    }

    #[test]
    fn test_invoice_group_zero_fee_has_no_fee_leg() {
        let group = PostingGroup::invoice(
            LedgerGroupId::new(),
            PaymentId::new(),
            MerchantId::new(),
            TokenAmount::from_base_units(1_000_000, 6),
            &usdt(),
            VndAmount::new(23_000).unwrap(),
            0,
            false,
        )
        .unwrap();
        assert_eq!(group.legs().len(), 4);
        assert!(!group
            .legs()
            .iter()
            .any(|leg| leg.account == LedgerAccount::FeeRevenue));
    }

    #[test]
    fn test_invoice_group_pending_first_targets_pending_account() {
        let merchant = MerchantId::new();
        let group = PostingGroup::invoice(
            LedgerGroupId::new(),
            PaymentId::new(),
            merchant,
            TokenAmount::from_base_units(1_000_000, 6),
            &usdt(),
            VndAmount::new(23_000).unwrap(),
            100,
            true,
        )
        .unwrap();
        assert!(group
            .legs()
            .iter()
            .any(|leg| leg.account == LedgerAccount::MerchantPending(merchant)));
    }

    #[test]
    fn test_payout_group_debits_available() {
        let merchant = MerchantId::new();
        let group = PostingGroup::payout(
            LedgerGroupId::new(),
            PayoutId::new(),
            merchant,
            VndAmount::new(500_000).unwrap(),
        )
        .unwrap();
        assert_eq!(group.legs().len(), 2);
        assert_eq!(group.legs()[0].direction, EntryDirection::DEBIT);
        assert_eq!(
            group.legs()[0].account,
            LedgerAccount::MerchantAvailable(merchant)
        );
    }
}
