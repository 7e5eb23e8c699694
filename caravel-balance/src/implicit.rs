//! Component C: implicit-coin accountant (§4.C).

use crate::model::{Certificate, TransactionBody};
use crate::{BalanceError, ProtocolParameters};

/// The three non-negative sums §4.C derives from a transaction body, fed
/// into both the balance equation (§4.G) and `is_transaction_balanced`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImplicitCoin {
    pub withdrawals: u64,
    pub deposits: u64,
    pub reclaim_deposits: u64,
}

pub fn compute_implicit_coin(
    body: &TransactionBody,
    params: &ProtocolParameters,
) -> Result<ImplicitCoin, BalanceError> {
    let mut withdrawals: u64 = 0;
    for coin in body.withdrawals.values() {
        withdrawals = withdrawals
            .checked_add(*coin)
            .ok_or(BalanceError::ArithmeticOverflow)?;
    }

    let mut deposits: u64 = 0;
    let mut reclaim_deposits: u64 = 0;

    for cert in &body.certificates {
        if let Some(explicit) = cert.deposit() {
            let amount = explicit.unwrap_or_else(|| default_deposit_for(cert, params));
            deposits = deposits
                .checked_add(amount)
                .ok_or(BalanceError::ArithmeticOverflow)?;
        }

        if let Certificate::PoolRegistration { .. } = cert {
            deposits = deposits
                .checked_add(params.pool_deposit)
                .ok_or(BalanceError::ArithmeticOverflow)?;
        }

        if let Some(explicit) = cert.reclaim() {
            let amount = explicit.unwrap_or(params.key_deposit);
            reclaim_deposits = reclaim_deposits
                .checked_add(amount)
                .ok_or(BalanceError::ArithmeticOverflow)?;
        }
    }

    for proposal in &body.proposal_procedures {
        deposits = deposits
            .checked_add(proposal.deposit)
            .ok_or(BalanceError::ArithmeticOverflow)?;
    }

    Ok(ImplicitCoin {
        withdrawals,
        deposits,
        reclaim_deposits,
    })
}

fn default_deposit_for(cert: &Certificate, params: &ProtocolParameters) -> u64 {
    match cert {
        Certificate::RegDRepCert(..) => params.drep_deposit,
        _ => params.key_deposit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Credential;
    use pallas_crypto::hash::Hash;

    fn key(byte: u8) -> Credential {
        Credential::KeyHash(Hash::new([byte; 28]))
    }

    #[test]
    fn sums_withdrawals_deposits_and_reclaims() {
        let params = ProtocolParameters::default();
        let mut body = TransactionBody::default();
        body.withdrawals.insert(vec![1, 2, 3], 1_000_000);
        body.certificates.push(Certificate::Reg(key(1), None));
        body.certificates
            .push(Certificate::StakeDeregistration(key(2)));

        let implicit = compute_implicit_coin(&body, &params).unwrap();
        assert_eq!(implicit.withdrawals, 1_000_000);
        assert_eq!(implicit.deposits, params.key_deposit);
        assert_eq!(implicit.reclaim_deposits, params.key_deposit);
    }

    #[test]
    fn pool_registration_adds_pool_deposit() {
        let params = ProtocolParameters::default();
        let mut body = TransactionBody::default();
        body.certificates.push(Certificate::PoolRegistration {
            operator: Hash::new([3; 28]),
            pool_owners: vec![Hash::new([4; 28])],
        });

        let implicit = compute_implicit_coin(&body, &params).unwrap();
        assert_eq!(implicit.deposits, params.pool_deposit);
    }

    #[test]
    fn explicit_cert_amount_overrides_parameter_default() {
        let params = ProtocolParameters::default();
        let mut body = TransactionBody::default();
        body.certificates
            .push(Certificate::UnReg(key(1), Some(3_000_000)));

        let implicit = compute_implicit_coin(&body, &params).unwrap();
        assert_eq!(implicit.reclaim_deposits, 3_000_000);
    }
}
