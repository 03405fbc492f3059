//! Synchronous request checks.
//!
//! A request that fails here never becomes a record.

use crate::config::SubmissionConfig;
use crate::txn::error::{ManagerError, ManagerResult};
use crate::txn::model::{TransactionRequest, PAYLOAD_SCHEMA_VERSION};

/// Reject malformed requests before anything is persisted.
pub fn validate_request(request: &TransactionRequest, config: &SubmissionConfig) -> ManagerResult<()> {
    if !config.is_known_service(&request.service) {
        return Err(ManagerError::Validation(format!(
            "unknown service '{}'",
            request.service
        )));
    }

    let payload = &request.payload;
    if payload.schema_version == 0 || payload.schema_version > PAYLOAD_SCHEMA_VERSION {
        return Err(ManagerError::Validation(format!(
            "unsupported payload schema version {}",
            payload.schema_version
        )));
    }
    if payload.script.trim().is_empty() {
        return Err(ManagerError::Validation("script must not be empty".into()));
    }
    if payload.script.len() > config.max_script_len {
        return Err(ManagerError::Validation(format!(
            "script length {} exceeds {}",
            payload.script.len(),
            config.max_script_len
        )));
    }
    if payload.method.as_deref().is_some_and(|m| m.trim().is_empty()) {
        return Err(ManagerError::Validation("method must not be blank".into()));
    }

    let fees = &request.fees;
    check_ceiling("gas price", fees.gas_price, config.max_gas_price)?;
    check_ceiling("system fee", fees.system_fee, config.max_system_fee)?;
    check_ceiling("network fee", fees.network_fee, config.max_network_fee)?;

    if let Some(key) = &request.idempotency_key {
        if key.is_empty() || key.len() > config.max_idempotency_key_len {
            return Err(ManagerError::Validation(format!(
                "idempotency key must be 1..={} characters",
                config.max_idempotency_key_len
            )));
        }
    }

    if let Some(entity) = &request.entity {
        if entity.kind.is_empty() || entity.id.is_empty() {
            return Err(ManagerError::Validation(
                "entity reference needs both kind and id".into(),
            ));
        }
    }

    Ok(())
}

/// Fees must stay strictly below their ceiling.
fn check_ceiling(name: &str, value: u64, ceiling: u64) -> ManagerResult<()> {
    if value >= ceiling {
        return Err(ManagerError::Validation(format!(
            "{} {} is not below ceiling {}",
            name, value, ceiling
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::model::{EntityRef, FeeParams, OperationPayload};

    fn request() -> TransactionRequest {
        TransactionRequest::new("oracle", OperationPayload::script("DAAUAQID"))
    }

    fn rejected(request: &TransactionRequest) -> String {
        match validate_request(request, &SubmissionConfig::default()) {
            Err(ManagerError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_request() {
        let request = request()
            .with_entity(EntityRef::new("oracle_update", "42"))
            .with_idempotency_key("req-42");
        assert!(validate_request(&request, &SubmissionConfig::default()).is_ok());
    }

    #[test]
    fn test_unknown_service() {
        let mut request = request();
        request.service = "payments".into();
        assert!(rejected(&request).contains("unknown service"));
    }

    #[test]
    fn test_empty_script() {
        let mut request = request();
        request.payload.script = "   ".into();
        assert_eq!(rejected(&request), "script must not be empty");
    }

    #[test]
    fn test_fee_ceiling() {
        let config = SubmissionConfig::default();
        let request = request().with_fees(FeeParams {
            gas_price: config.max_gas_price + 1,
            ..Default::default()
        });
        assert!(rejected(&request).starts_with("gas price"));

        let at_ceiling = self::request().with_fees(FeeParams {
            network_fee: config.max_network_fee,
            ..Default::default()
        });
        assert!(rejected(&at_ceiling).starts_with("network fee"));

        let below = self::request().with_fees(FeeParams {
            gas_price: config.max_gas_price - 1,
            system_fee: config.max_system_fee - 1,
            network_fee: config.max_network_fee - 1,
        });
        assert!(validate_request(&below, &config).is_ok());
    }

    #[test]
    fn test_schema_version() {
        let mut request = request();
        request.payload.schema_version = PAYLOAD_SCHEMA_VERSION + 1;
        assert!(rejected(&request).contains("schema version"));
    }

    #[test]
    fn test_idempotency_key_length() {
        let request = request().with_idempotency_key("k".repeat(129));
        assert!(rejected(&request).contains("idempotency key"));
    }
}
