//! Provider catalogue: the built-in Brazilian sources and JSON catalogue files.
//!
//! A catalogue file is `{ "providers": [ ProviderConfig, ... ] }`. Loading
//! validates every entry and rejects duplicate ids.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::mapping::MapperKind;
use crate::provider_config::{
    AuthDescriptor, AuthKind, EndpointConfig, ProviderConfig, RateLimitBudget, RetrySettings,
};
use crate::{Capability, CoreError, ProviderId, Tier, TransportKind, ValidationError};

const LOG_TARGET: &str = "fiscalis::catalog";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub providers: Vec<ProviderConfig>,
}

impl Catalog {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self { providers }
    }

    /// The built-in sources, all enabled and live.
    pub fn builtin() -> Self {
        Self::new(vec![
            receita_federal(),
            brasilapi(),
            pgfn(),
            cvm(),
            bacen(),
            datajud(),
            sefaz(),
            serasa(),
            ieptb(),
        ])
    }

    pub fn from_json(input: &str) -> Result<Self, CoreError> {
        let catalog: Self = serde_json::from_str(input)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&input)?;
        log::info!(
            target: LOG_TARGET,
            "loaded {} provider(s) from {}",
            catalog.providers.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(&provider.id) {
                return Err(ValidationError::DuplicateProvider {
                    id: provider.id.to_string(),
                });
            }
            provider.validate()?;
        }
        Ok(())
    }

    pub fn get(&self, id: &ProviderId) -> Option<&ProviderConfig> {
        self.providers.iter().find(|provider| &provider.id == id)
    }
}

fn identity_endpoint(path: &str) -> EndpointConfig {
    EndpointConfig::get("identity", path, Capability::Identity).with_cache_ttl_secs(86_400)
}

fn status_endpoint(path: &str) -> EndpointConfig {
    EndpointConfig::get("status", path, Capability::Health)
        .with_params(&[])
        .with_cache_ttl_secs(0)
        .with_retry(RetrySettings::new(1, 0, 1.0, 0))
}

fn receita_federal() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("receita_federal"),
        "Receita Federal",
        Tier::Tier1,
        "https://api.receitafederal.gov.br",
        MapperKind::Identity,
    )
    .with_auth(AuthDescriptor::oauth2(
        "https://api.receitafederal.gov.br/oauth2/token",
        Some("consulta-cadastro"),
    ))
    .with_endpoint(identity_endpoint("/cadastro/v1/contribuintes/{subject}"))
    .with_endpoint(status_endpoint("/status"))
    .with_health_endpoint("status")
    .with_rate_limit(RateLimitBudget::per_minute(60).with_per_day(10_000))
    .with_priority(1)
}

fn brasilapi() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("brasilapi"),
        "BrasilAPI",
        Tier::Tier2,
        "https://brasilapi.com.br/api",
        MapperKind::Identity,
    )
    .with_endpoint(identity_endpoint("/cnpj/v1/{subject}"))
    .with_rate_limit(RateLimitBudget::per_minute(30))
    .with_priority(2)
}

fn pgfn() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("pgfn"),
        "PGFN - Divida Ativa da Uniao",
        Tier::Tier1,
        "https://api.pgfn.fazenda.gov.br",
        MapperKind::Pgfn,
    )
    .with_auth(AuthDescriptor::api_key("x-api-key"))
    .with_endpoint(EndpointConfig::get(
        "debts",
        "/divida-ativa/v1/devedores/{subject}",
        Capability::DebtRegistry,
    ))
    .with_endpoint(status_endpoint("/divida-ativa/v1/status"))
    .with_health_endpoint("status")
    .with_rate_limit(RateLimitBudget::per_minute(30).with_per_day(5_000))
    .with_cache_ttl_secs(6 * 3_600)
    .with_priority(1)
}

fn cvm() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("cvm"),
        "CVM - Comissao de Valores Mobiliarios",
        Tier::Tier2,
        "https://api.cvm.gov.br",
        MapperKind::Cvm,
    )
    .with_endpoint(EndpointConfig::get(
        "holdings",
        "/registros/v1/titulares/{subject}",
        Capability::Securities,
    ))
    .with_rate_limit(RateLimitBudget::per_minute(60))
    .with_cache_ttl_secs(24 * 3_600)
    .with_priority(2)
}

fn bacen() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("bacen"),
        "Banco Central - Valores a Receber",
        Tier::Tier1,
        "https://api.bcb.gov.br",
        MapperKind::Bacen,
    )
    .with_auth(AuthDescriptor {
        kind: AuthKind::Certificate,
        auto_refresh: false,
    })
    .with_endpoint(
        EndpointConfig::get(
            "receivables",
            "/valores-a-receber/v1/consultas/{subject}",
            Capability::CentralBank,
        )
        .with_timeout_ms(20_000),
    )
    .with_rate_limit(RateLimitBudget::per_minute(20).with_per_hour(600))
    .with_circuit_breaker(CircuitBreakerConfig {
        failure_threshold: 3,
        ..CircuitBreakerConfig::default()
    })
    .with_priority(1)
}

fn datajud() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("datajud"),
        "DataJud - CNJ",
        Tier::Tier2,
        "https://api-publica.datajud.cnj.jus.br",
        MapperKind::Datajud,
    )
    .with_auth(AuthDescriptor::api_key("authorization"))
    .with_endpoint(EndpointConfig::post(
        "lawsuits",
        "/api_publica_trf1/_search",
        r#"{"query":{"match":{"partes.documento":"{subject}"}},"size":100}"#,
        Capability::JudicialClaims,
    ))
    .with_rate_limit(RateLimitBudget::per_minute(120))
    .with_retry(RetrySettings::new(4, 500, 2.0, 8_000))
    .with_timeout_ms(30_000)
    .with_priority(2)
}

fn sefaz() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("sefaz"),
        "SEFAZ - Creditos de ICMS",
        Tier::Tier2,
        "https://api.fazenda.sp.gov.br",
        MapperKind::Sefaz,
    )
    .with_transport(TransportKind::Hybrid)
    .with_auth(AuthDescriptor::oauth2(
        "https://api.fazenda.sp.gov.br/oauth/token",
        None,
    ))
    .with_endpoint(EndpointConfig::get(
        "credits",
        "/creditos/v1/contribuintes/{subject}",
        Capability::TaxCredits,
    ))
    .with_rate_limit(RateLimitBudget::per_minute(10).with_per_day(2_000))
    .with_priority(2)
}

fn serasa() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("serasa"),
        "Serasa Experian",
        Tier::Tier3,
        "https://api.serasaexperian.com.br",
        MapperKind::Serasa,
    )
    .with_auth(AuthDescriptor {
        kind: AuthKind::Basic,
        auto_refresh: false,
    })
    .with_endpoint(EndpointConfig::get(
        "pendencies",
        "/consultas/v1/pendencias/{subject}",
        Capability::CreditBureau,
    ))
    .with_rate_limit(RateLimitBudget::per_minute(30).with_per_day(1_000))
    .with_priority(3)
}

fn ieptb() -> ProviderConfig {
    ProviderConfig::new(
        ProviderId::from_static("ieptb"),
        "IEPTB - Protestos",
        Tier::Tier3,
        "https://api.pesquisaprotesto.com.br",
        MapperKind::Ieptb,
    )
    .with_transport(TransportKind::Hybrid)
    .with_auth(AuthDescriptor {
        kind: AuthKind::Bearer,
        auto_refresh: true,
    })
    .with_endpoint(EndpointConfig::get(
        "protests",
        "/v1/protestos/{subject}",
        Capability::NotaryProtests,
    ))
    .with_rate_limit(RateLimitBudget::per_minute(20))
    .with_priority(3)
}
