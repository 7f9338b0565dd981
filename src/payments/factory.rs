use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::gateways::{MomoGateway, VnpayGateway};
use crate::payments::types::GatewayName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GatewayRegistryConfig {
    pub default_gateway: GatewayName,
    pub enabled_gateways: Vec<GatewayName>,
}

impl GatewayRegistryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let default_gateway =
            std::env::var("DEFAULT_PAYMENT_GATEWAY").unwrap_or_else(|_| "vnpay".to_string());
        let default_gateway = GatewayName::from_str(&default_gateway)?;

        let enabled_raw = std::env::var("ENABLED_PAYMENT_GATEWAYS")
            .unwrap_or_else(|_| "vnpay,momo".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let gateway = GatewayName::from_str(value)?;
            if !enabled_gateways.contains(&gateway) {
                enabled_gateways.push(gateway);
            }
        }

        let config = Self {
            default_gateway,
            enabled_gateways,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if !self.enabled_gateways.contains(&self.default_gateway) {
            return Err(PaymentError::ValidationError {
                message: "default gateway must be enabled".to_string(),
                field: Some("DEFAULT_PAYMENT_GATEWAY".to_string()),
            });
        }
        Ok(())
    }
}

/// The enabled gateways, built once at startup and shared by handlers and
/// the reconciler.
#[derive(Clone)]
pub struct GatewayRegistry {
    default_gateway: GatewayName,
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn from_env() -> PaymentResult<Self> {
        let config = GatewayRegistryConfig::from_env()?;
        let mut gateways: Vec<Arc<dyn PaymentGateway>> = Vec::new();
        for name in &config.enabled_gateways {
            let gateway: Arc<dyn PaymentGateway> = match name {
                GatewayName::VnPay => Arc::new(VnpayGateway::from_env()?),
                GatewayName::MoMo => Arc::new(MomoGateway::from_env()?),
            };
            info!(gateway = %name, "payment gateway enabled");
            gateways.push(gateway);
        }
        Self::with_gateways(config.default_gateway, gateways)
    }

    pub fn with_gateways(
        default_gateway: GatewayName,
        gateways: Vec<Arc<dyn PaymentGateway>>,
    ) -> PaymentResult<Self> {
        let gateways: HashMap<_, _> = gateways.into_iter().map(|g| (g.name(), g)).collect();
        let registry = Self {
            default_gateway,
            gateways,
        };
        if !registry.gateways.contains_key(&default_gateway) {
            return Err(PaymentError::ValidationError {
                message: format!("default gateway {} is not registered", default_gateway),
                field: Some("DEFAULT_PAYMENT_GATEWAY".to_string()),
            });
        }
        Ok(registry)
    }

    pub fn get(&self, gateway: GatewayName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&gateway)
            .cloned()
            .ok_or(PaymentError::ValidationError {
                message: format!("gateway {} is disabled", gateway),
                field: Some("gateway".to_string()),
            })
    }

    pub fn get_default(&self) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get(self.default_gateway)
    }

    pub fn default_gateway(&self) -> GatewayName {
        self.default_gateway
    }

    pub fn list_available(&self) -> Vec<GatewayName> {
        let mut names: Vec<_> = self.gateways.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }
}
