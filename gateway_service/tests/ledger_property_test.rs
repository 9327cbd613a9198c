//! Property-based tests for ledger invariants
//!
//! These tests exercise the posting-group constructor and the balance
//! projection over random histories:
//! - Money conservation: sum(debits) == sum(credits) per currency
//! - Every currency nets to zero across a whole posted history
//! - Invoice groups preserve the fee split exactly
//! - Unbalanced or non-positive legs are always rejected

use std::collections::HashMap;

use common::{TokenAmount, TokenSymbol, VndAmount};
use proptest::prelude::*;
use rust_decimal::Decimal;

use gateway_service::domain::ledger::{
    EntryDirection, LedgerAccount, LedgerGroupId, PostingGroup, PostingLeg,
};
use gateway_service::domain::types::{MerchantId, PaymentId};

/// Strategy for positive integral amounts (minor/base units).
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1u64..1_000_000_000_000u64).prop_map(Decimal::from)
}

fn currency_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("VND".to_string()),
        Just("USDT".to_string()),
        Just("USDC".to_string()),
    ]
}

fn account_strategy() -> impl Strategy<Value = LedgerAccount> {
    prop_oneof![
        Just(LedgerAccount::CryptoPool),
        Just(LedgerAccount::FeeRevenue),
        Just(LedgerAccount::EscrowLiability),
        Just(LedgerAccount::FiatOutgoing),
    ]
}

/// A balanced group: for each (currency, amount) pair, one debit and one
/// credit leg over arbitrary accounts.
fn balanced_group_strategy() -> impl Strategy<Value = PostingGroup> {
    proptest::collection::vec(
        (amount_strategy(), currency_strategy(), account_strategy(), account_strategy()),
        1..5,
    )
    .prop_map(|pairs| {
        let mut legs = Vec::new();
        for (amount, currency, debit_account, credit_account) in pairs {
            legs.push(PostingLeg::debit(debit_account, amount, currency.clone()));
            legs.push(PostingLeg::credit(credit_account, amount, currency));
        }
        PostingGroup::new(LedgerGroupId::new(), legs, None, None)
            .expect("pairwise-mirrored legs always balance")
    })
}

/// In-memory projection identical in shape to `account_balances`:
/// balance = credits - debits per (account, currency).
fn apply_to_projection(
    projection: &mut HashMap<(String, String), Decimal>,
    group: &PostingGroup,
) {
    for leg in group.legs() {
        let delta = match leg.direction {
            EntryDirection::CREDIT => leg.amount,
            EntryDirection::DEBIT => -leg.amount,
        };
        *projection
            .entry((leg.account.key(), leg.currency.clone()))
            .or_insert(Decimal::ZERO) += delta;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: every constructed group balances per currency.
    #[test]
    fn prop_groups_balance_per_currency(group in balanced_group_strategy()) {
        let mut per_currency: HashMap<&str, Decimal> = HashMap::new();
        for leg in group.legs() {
            let delta = match leg.direction {
                EntryDirection::DEBIT => leg.amount,
                EntryDirection::CREDIT => -leg.amount,
            };
            *per_currency.entry(leg.currency.as_str()).or_insert(Decimal::ZERO) += delta;
        }
        for (currency, net) in per_currency {
            prop_assert_eq!(net, Decimal::ZERO, "currency {} does not net to zero", currency);
        }
    }

    /// Property: after any history of posted groups, each currency nets
    /// to zero across the whole projection (money is conserved).
    #[test]
    fn prop_projection_conserves_money(
        groups in proptest::collection::vec(balanced_group_strategy(), 1..20)
    ) {
        let mut projection = HashMap::new();
        for group in &groups {
            apply_to_projection(&mut projection, group);
        }

        let mut per_currency: HashMap<String, Decimal> = HashMap::new();
        for ((_, currency), balance) in &projection {
            *per_currency.entry(currency.clone()).or_insert(Decimal::ZERO) += *balance;
        }
        for (currency, net) in per_currency {
            prop_assert_eq!(net, Decimal::ZERO, "currency {} leaked value", currency);
        }
    }

    /// Property: a single corrupted leg amount always breaks the group.
    #[test]
    fn prop_tampered_group_rejected(
        amount in amount_strategy(),
        skew in 1u64..1_000u64,
        currency in currency_strategy(),
    ) {
        let result = PostingGroup::new(
            LedgerGroupId::new(),
            vec![
                PostingLeg::debit(LedgerAccount::CryptoPool, amount, currency.clone()),
                PostingLeg::credit(
                    LedgerAccount::EscrowLiability,
                    amount + Decimal::from(skew),
                    currency,
                ),
            ],
            None,
            None,
        );
        prop_assert!(result.is_err());
    }

    /// Property: the invoice group conserves VND exactly under any fee,
    /// and the merchant + fee legs reassemble the invoice total.
    #[test]
    fn prop_invoice_fee_split_is_exact(
        amount_vnd in 1_000i64..2_000_000_000i64,
        fee_bps in 0u32..=1_000u32,
        base_units in 1u64..1_000_000_000_000u64,
    ) {
        let merchant = MerchantId::new();
        let group = PostingGroup::invoice(
            LedgerGroupId::new(),
            PaymentId::new(),
            merchant,
            TokenAmount::from_base_units(base_units as u128, 6),
            &TokenSymbol::new("USDT").unwrap(),
            VndAmount::new(amount_vnd).unwrap(),
            fee_bps,
            false,
        ).unwrap();

        let merchant_credit: Decimal = group.legs().iter()
            .filter(|leg| leg.account == LedgerAccount::MerchantAvailable(merchant))
            .map(|leg| leg.amount)
            .sum();
        let fee_credit: Decimal = group.legs().iter()
            .filter(|leg| leg.account == LedgerAccount::FeeRevenue)
            .map(|leg| leg.amount)
            .sum();

        prop_assert_eq!(merchant_credit + fee_credit, Decimal::from(amount_vnd));
    }
}
