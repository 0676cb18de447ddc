use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use crate::adapters::template::PathTemplate;
use crate::cache::{CacheOutcome, CacheStore};
use crate::data_source::{CallRequest, CallResponse, HealthStatus, ProviderClient, SourceError};
use crate::mapping::MapperKind;
use crate::provider_config::ProviderConfig;
use crate::{ProviderId, SubjectId, SubjectKind, ValidationError};

const LOG_TARGET: &str = "fiscalis::adapters::simulated";

const INSTITUTIONS: [&str; 3] = ["Banco do Brasil", "Caixa", "Itau"];

/// Deterministic stand-in for a provider, selected with `mode: simulated`.
///
/// Payloads are generated from the subject id and provider id, so repeated
/// runs return identical data. Calls go through the shared cache but never
/// touch the network or the rate limiter.
#[derive(Debug)]
pub struct SimulatedProvider {
    config: ProviderConfig,
    cache: CacheStore<Value>,
    latency: Duration,
    templates: HashMap<String, PathTemplate>,
    payloads: HashMap<String, Value>,
    failure: Option<SourceError>,
}

impl SimulatedProvider {
    pub fn new(config: ProviderConfig, cache: CacheStore<Value>) -> Result<Self, ValidationError> {
        let templates = config
            .endpoints
            .iter()
            .map(|endpoint| Ok((endpoint.id.clone(), PathTemplate::parse(&endpoint.path)?)))
            .collect::<Result<HashMap<_, _>, ValidationError>>()?;

        Ok(Self {
            config,
            cache,
            latency: Duration::ZERO,
            templates,
            payloads: HashMap::new(),
            failure: None,
        })
    }

    /// Simulated network latency per uncached call.
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fixed payload for one endpoint instead of generated data.
    pub fn with_payload(mut self, endpoint: impl Into<String>, payload: Value) -> Self {
        let _ = self.payloads.insert(endpoint.into(), payload);
        self
    }

    /// Makes every call fail with `error`.
    pub fn with_failure(mut self, error: SourceError) -> Self {
        self.failure = Some(error);
        self
    }

    async fn execute_call(&self, request: CallRequest) -> Result<CallResponse, SourceError> {
        let started = Instant::now();
        let endpoint = self
            .config
            .endpoint(&request.endpoint)
            .ok_or_else(|| SourceError::unknown_endpoint(&self.config.id, &request.endpoint))?;
        let template = self
            .templates
            .get(&endpoint.id)
            .ok_or_else(|| SourceError::unknown_endpoint(&self.config.id, &endpoint.id))?;
        let _ = template.render_path(&request.params)?;

        let cache_key = request.effective_cache_key(&self.config.id);
        let ttl = self.config.cache_ttl_for(endpoint);
        let (endpoint_id, request) = (endpoint.id.as_str(), &request);
        let (payload, outcome) = self
            .cache
            .get_or_compute_with_mode(request.cache_mode, &cache_key, Some(ttl), move || async move {
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                if let Some(error) = &self.failure {
                    return Err(error.clone().with_attempts(1));
                }
                Ok(self.payload_for(endpoint_id, request))
            })
            .await?;

        log::debug!(
            target: LOG_TARGET,
            "'{}' simulated '{}' ({})",
            self.config.id,
            endpoint.id,
            if outcome == CacheOutcome::Hit { "cached" } else { "generated" }
        );

        Ok(CallResponse {
            payload,
            cache_hit: outcome == CacheOutcome::Hit,
            attempts: u32::from(outcome == CacheOutcome::Miss),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    fn payload_for(&self, endpoint: &str, request: &CallRequest) -> Value {
        if let Some(payload) = self.payloads.get(endpoint) {
            return payload.clone();
        }

        let subject = request
            .params
            .get("subject")
            .and_then(|raw| SubjectId::parse(raw).ok());
        match subject {
            Some(subject) => sample_payload(&self.config.mapper, &self.config.id, &subject),
            None => json!({"status": "ok"}),
        }
    }
}

impl ProviderClient for SimulatedProvider {
    fn id(&self) -> &ProviderId {
        &self.config.id
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn call<'a>(
        &'a self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.execute_call(request)
                .await
                .map_err(|error| error.with_provider(self.config.id.clone()))
        })
    }

    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + 'a>> {
        Box::pin(async move {
            let latency_ms = u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX);
            match &self.failure {
                Some(error) => HealthStatus::unhealthy(error.to_string(), latency_ms),
                None => HealthStatus::healthy(latency_ms).with_detail("simulated"),
            }
        })
    }
}

/// Generates a plausible payload in the shape `mapper` reads.
fn sample_payload(mapper: &MapperKind, provider: &ProviderId, subject: &SubjectId) -> Value {
    let provider_seed = provider
        .as_str()
        .bytes()
        .fold(0_u64, |acc, byte| acc.wrapping_mul(131).wrapping_add(u64::from(byte)));
    let mut rng = fastrand::Rng::with_seed(subject.seed() ^ provider_seed);
    let digits = subject.as_str();
    let mut amount = |min: u64, max: u64| (rng.u64(min..max) as f64) + f64::from(rng.u8(0..100)) / 100.0;

    match mapper {
        MapperKind::Identity => match subject.kind() {
            SubjectKind::Cnpj => json!({
                "cnpj": digits,
                "razao_social": format!("EMPRESA SIMULADA {} LTDA", &digits[..8]),
                "situacao_cadastral": "ATIVA",
            }),
            SubjectKind::Cpf => json!({
                "cpf": digits,
                "nome": format!("CONTRIBUINTE SIMULADO {}", &digits[..3]),
                "situacao_cadastral": "REGULAR",
            }),
        },
        MapperKind::Pgfn => {
            let count = subject.seed() % 3;
            let inscricoes = (0..count)
                .map(|n| {
                    json!({
                        "numero_inscricao": format!("80.6.{}.{:06}-{:02}", 20 + n, subject.seed() % 1_000_000, n),
                        "valor_consolidado": amount(5_000, 400_000),
                        "situacao": "ativa em cobranca",
                        "receita_principal": "IRPJ",
                    })
                })
                .collect::<Vec<_>>();
            json!({ "inscricoes": inscricoes })
        }
        MapperKind::Cvm => {
            let registros = (0..(subject.seed() >> 3) % 2 + 1)
                .map(|n| {
                    json!({
                        "id": format!("CVM-{digits}-{n}"),
                        "tipo": if n == 0 { "credito" } else { "valor_mobiliario" },
                        "valor": amount(1_000, 250_000),
                        "status": "ativo",
                    })
                })
                .collect::<Vec<_>>();
            json!({ "registros": registros })
        }
        MapperKind::Bacen => {
            let itens = (0..(subject.seed() >> 5) % 3)
                .map(|n| {
                    let instituicao = INSTITUTIONS[n as usize % INSTITUTIONS.len()];
                    json!({
                        "protocolo": format!("SVR{}{n}", &digits[..6]),
                        "valor": amount(50, 20_000),
                        "instituicao": instituicao,
                        "situacao": "disponivel",
                    })
                })
                .collect::<Vec<_>>();
            json!({ "valores_a_receber": itens })
        }
        MapperKind::Datajud => {
            let hits = (0..(subject.seed() >> 7) % 3)
                .map(|n| {
                    json!({
                        "_source": {
                            "numeroProcesso": format!("{:07}{n}2023401{:04}", subject.seed() % 10_000_000, n),
                            "valorCausa": amount(10_000, 2_000_000),
                            "classe": {"nome": "Procedimento Comum Civel"},
                            "polo": if n % 2 == 0 { "ativo" } else { "passivo" },
                        }
                    })
                })
                .collect::<Vec<_>>();
            json!({ "hits": { "hits": hits } })
        }
        MapperKind::Sefaz => {
            let creditos = (0..(subject.seed() >> 9) % 2 + 1)
                .map(|n| {
                    json!({
                        "id": format!("ICMS-{}-{n}", &digits[..8]),
                        "valor": amount(2_000, 600_000),
                        "tipo": "credito acumulado de ICMS",
                        "situacao": "homologado",
                    })
                })
                .collect::<Vec<_>>();
            json!({ "creditos": creditos })
        }
        MapperKind::Serasa => {
            let pendencias = (0..(subject.seed() >> 11) % 3)
                .map(|n| {
                    json!({
                        "contrato": format!("CTR{}{n}", &digits[..5]),
                        "valor": amount(200, 80_000),
                        "credor": "Instituicao Financeira",
                        "situacao": "em aberto",
                    })
                })
                .collect::<Vec<_>>();
            json!({ "pendencias": pendencias })
        }
        MapperKind::Ieptb => {
            let protestos = (0..(subject.seed() >> 13) % 2)
                .map(|n| {
                    json!({
                        "protocolo": format!("PROT{}{n}", &digits[..6]),
                        "valor": amount(500, 50_000),
                        "cartorio": "1o Tabelionato de Protesto",
                    })
                })
                .collect::<Vec<_>>();
            json!({ "protestos": protestos })
        }
        MapperKind::Generic(generic) => {
            let record = json!({
                generic.reference.as_str(): format!("SIM-{digits}"),
                generic.value.as_str(): amount(1_000, 100_000),
            });
            generic
                .records
                .rsplit('.')
                .filter(|segment| !segment.is_empty())
                .fold(json!([record]), |inner, segment| json!({ segment: inner }))
        }
    }
}
