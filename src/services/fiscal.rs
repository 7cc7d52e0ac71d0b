use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Fiscal condition of a taxpayer before the tax authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxCondition {
    ResponsableInscripto,
    Monotributista,
    Exento,
    ConsumidorFinal,
    Other,
}

impl TaxCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxCondition::ResponsableInscripto => "RESPONSABLE_INSCRIPTO",
            TaxCondition::Monotributista => "MONOTRIBUTISTA",
            TaxCondition::Exento => "EXENTO",
            TaxCondition::ConsumidorFinal => "CONSUMIDOR_FINAL",
            TaxCondition::Other => "OTHER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RESPONSABLE_INSCRIPTO" => Some(TaxCondition::ResponsableInscripto),
            "MONOTRIBUTISTA" => Some(TaxCondition::Monotributista),
            "EXENTO" => Some(TaxCondition::Exento),
            "CONSUMIDOR_FINAL" => Some(TaxCondition::ConsumidorFinal),
            "OTHER" => Some(TaxCondition::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    FacturaA,
    FacturaB,
    FacturaC,
    FacturaX,
}

impl InvoiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceType::FacturaA => "FACTURA_A",
            InvoiceType::FacturaB => "FACTURA_B",
            InvoiceType::FacturaC => "FACTURA_C",
            InvoiceType::FacturaX => "FACTURA_X",
        }
    }
}

/// Invoice letter for a seller/buyer pair.
///
/// | seller                | buyer                 | type |
/// |-----------------------|-----------------------|------|
/// | RESPONSABLE_INSCRIPTO | RESPONSABLE_INSCRIPTO | A    |
/// | RESPONSABLE_INSCRIPTO | anything else         | B    |
/// | MONOTRIBUTISTA        | any                   | C    |
/// | anything else         | any                   | X    |
pub fn determine_invoice_type(seller: TaxCondition, buyer: TaxCondition) -> InvoiceType {
    match (seller, buyer) {
        (TaxCondition::ResponsableInscripto, TaxCondition::ResponsableInscripto) => {
            InvoiceType::FacturaA
        }
        (TaxCondition::ResponsableInscripto, _) => InvoiceType::FacturaB,
        (TaxCondition::Monotributista, _) => InvoiceType::FacturaC,
        _ => InvoiceType::FacturaX,
    }
}

/// 14-digit placeholder with the shape of a real CAE. Not authoritative.
pub fn generate_mock_cae() -> String {
    let mut rng = rand::thread_rng();
    let mut cae = String::with_capacity(14);
    cae.push(char::from(b'1' + rng.gen_range(0..9u8)));
    for _ in 0..13 {
        cae.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    cae
}

/// Data the tax authority needs to authorize an invoice.
#[derive(Debug, Clone)]
pub struct CaeRequest {
    pub invoice_type: InvoiceType,
    pub point_of_sale: i32,
    pub number: i64,
    pub total: Decimal,
    pub issued_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaeGrant {
    pub cae: String,
    pub expires_on: NaiveDate,
}

/// Tax-authority client issuing CAE codes.
#[async_trait]
pub trait CaeAuthority: Send + Sync {
    async fn authorize(&self, request: &CaeRequest) -> Result<CaeGrant, ServiceError>;
}

/// Issues placeholder codes locally.
#[derive(Debug, Clone)]
pub struct MockCaeAuthority {
    validity_days: i64,
}

impl MockCaeAuthority {
    pub fn new(validity_days: i64) -> Self {
        Self { validity_days }
    }
}

impl Default for MockCaeAuthority {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl CaeAuthority for MockCaeAuthority {
    async fn authorize(&self, request: &CaeRequest) -> Result<CaeGrant, ServiceError> {
        Ok(CaeGrant {
            cae: generate_mock_cae(),
            expires_on: request.issued_on + Duration::days(self.validity_days),
        })
    }
}
