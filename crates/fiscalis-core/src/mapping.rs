//! Response mappers: provider payload to [`SourceRecord`]s.
//!
//! Each provider names exactly one [`MapperKind`] in its catalogue entry.
//! Mappers read the fields they know and reject payloads missing them;
//! unknown fields are ignored.
//!
//! | Mapper | Payload shape | Category |
//! |--------|---------------|----------|
//! | `pgfn` | `inscricoes[]{numero_inscricao, valor_consolidado, situacao, receita_principal}` | debt |
//! | `cvm` | `registros[]{id, tipo, valor, status}` | credit / security |
//! | `bacen` | `valores_a_receber[]{protocolo, valor, instituicao, situacao}` | credit |
//! | `datajud` | `hits.hits[]._source{numeroProcesso, valorCausa, classe.nome, polo}` | judicial claim |
//! | `sefaz` | `creditos[]{id, valor, tipo, situacao}` | credit |
//! | `serasa` | `pendencias[]{contrato, valor, credor, situacao}` | debt |
//! | `ieptb` | `protestos[]{protocolo, valor, cartorio}` | debt |
//! | `identity` | `{razao_social \| nome}` | none (display name only) |
//! | `generic` | configurable dotted paths | configured |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_source::SourceError;
use crate::{OpportunityCategory, SourceRecord};

const DISPLAY_NAME_FIELDS: [&str; 4] = ["razao_social", "nome", "nome_empresarial", "nome_fantasia"];

/// Field mapping for catalogue providers without a dedicated mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericMapper {
    /// Dotted path to the record array, e.g. `data.items`.
    pub records: String,
    pub reference: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: OpportunityCategory,
}

/// Known response shapes, selected per provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapperKind {
    Identity,
    Pgfn,
    Cvm,
    Bacen,
    Datajud,
    Sefaz,
    Serasa,
    Ieptb,
    Generic(GenericMapper),
}

impl MapperKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Pgfn => "pgfn",
            Self::Cvm => "cvm",
            Self::Bacen => "bacen",
            Self::Datajud => "datajud",
            Self::Sefaz => "sefaz",
            Self::Serasa => "serasa",
            Self::Ieptb => "ieptb",
            Self::Generic(_) => "generic",
        }
    }

    /// Extracts records from one endpoint payload.
    ///
    /// # Errors
    ///
    /// `InvalidResponse` when the record array or a required field is
    /// missing, or an amount is not a finite non-negative number.
    pub fn map(&self, payload: &Value) -> Result<Vec<SourceRecord>, SourceError> {
        match self {
            Self::Identity => Ok(Vec::new()),
            Self::Pgfn => array_at(payload, "inscricoes")?
                .iter()
                .map(|item| {
                    record(
                        required_text(item, "numero_inscricao")?,
                        OpportunityCategory::Debt,
                        amount(item, "valor_consolidado")?,
                        text(item, "situacao").unwrap_or_else(|| String::from("ativa")),
                        text(item, "receita_principal")
                            .unwrap_or_else(|| String::from("divida ativa da uniao")),
                    )
                })
                .collect(),
            Self::Cvm => array_at(payload, "registros")?
                .iter()
                .map(|item| {
                    let category = match required_text(item, "tipo")?.as_str() {
                        "credito" => OpportunityCategory::Credit,
                        "valor_mobiliario" => OpportunityCategory::Security,
                        other => {
                            return Err(SourceError::invalid_response(format!(
                                "unknown cvm record type '{other}'"
                            )))
                        }
                    };
                    record(
                        required_text(item, "id")?,
                        category,
                        amount(item, "valor")?,
                        text(item, "status").unwrap_or_else(|| String::from("ativo")),
                        String::from("registro cvm"),
                    )
                })
                .collect(),
            Self::Bacen => array_at(payload, "valores_a_receber")?
                .iter()
                .map(|item| {
                    record(
                        required_text(item, "protocolo")?,
                        OpportunityCategory::Credit,
                        amount(item, "valor")?,
                        text(item, "situacao").unwrap_or_else(|| String::from("disponivel")),
                        text(item, "instituicao")
                            .map(|bank| format!("valor a receber: {bank}"))
                            .unwrap_or_else(|| String::from("valor a receber")),
                    )
                })
                .collect(),
            Self::Datajud => map_datajud(payload),
            Self::Sefaz => array_at(payload, "creditos")?
                .iter()
                .map(|item| {
                    record(
                        required_text(item, "id")?,
                        OpportunityCategory::Credit,
                        amount(item, "valor")?,
                        text(item, "situacao").unwrap_or_else(|| String::from("homologado")),
                        text(item, "tipo").unwrap_or_else(|| String::from("credito de icms")),
                    )
                })
                .collect(),
            Self::Serasa => array_at(payload, "pendencias")?
                .iter()
                .map(|item| {
                    record(
                        required_text(item, "contrato")?,
                        OpportunityCategory::Debt,
                        amount(item, "valor")?,
                        text(item, "situacao").unwrap_or_else(|| String::from("em aberto")),
                        text(item, "credor")
                            .map(|creditor| format!("pendencia com {creditor}"))
                            .unwrap_or_else(|| String::from("pendencia financeira")),
                    )
                })
                .collect(),
            Self::Ieptb => array_at(payload, "protestos")?
                .iter()
                .map(|item| {
                    record(
                        required_text(item, "protocolo")?,
                        OpportunityCategory::Debt,
                        amount(item, "valor")?,
                        String::from("protestado"),
                        text(item, "cartorio")
                            .map(|office| format!("protesto em {office}"))
                            .unwrap_or_else(|| String::from("protesto")),
                    )
                })
                .collect(),
            Self::Generic(mapper) => array_at(payload, &mapper.records)?
                .iter()
                .map(|item| {
                    record(
                        required_text(item, &mapper.reference)?,
                        mapper.category,
                        amount(item, &mapper.value)?,
                        mapper
                            .status
                            .as_deref()
                            .and_then(|field| text(item, field))
                            .unwrap_or_default(),
                        mapper
                            .description
                            .as_deref()
                            .and_then(|field| text(item, field))
                            .unwrap_or_default(),
                    )
                })
                .collect(),
        }
    }
}

/// Subject display name from an identity payload, if any known field is present.
pub fn display_name(payload: &Value) -> Option<String> {
    DISPLAY_NAME_FIELDS
        .iter()
        .filter_map(|field| text(payload, field))
        .find(|name| !name.trim().is_empty())
        .map(|name| name.trim().to_owned())
}

/// Only lawsuits where the subject is on the active side are claims.
fn map_datajud(payload: &Value) -> Result<Vec<SourceRecord>, SourceError> {
    let mut records = Vec::new();
    for hit in array_at(payload, "hits.hits")? {
        let source = hit
            .get("_source")
            .ok_or_else(|| SourceError::invalid_response("datajud hit without '_source'"))?;

        let side = text(source, "polo").unwrap_or_else(|| String::from("ativo"));
        if side != "ativo" {
            continue;
        }

        let value = match source.get("valorCausa") {
            None | Some(Value::Null) => 0.0,
            Some(_) => amount(source, "valorCausa")?,
        };
        records.push(record(
            required_text(source, "numeroProcesso")?,
            OpportunityCategory::JudicialClaim,
            value,
            text(source, "situacao").unwrap_or_else(|| String::from("em andamento")),
            lookup(source, "classe.nome")
                .and_then(as_text)
                .unwrap_or_else(|| String::from("processo judicial")),
        )?);
    }
    Ok(records)
}

fn record(
    reference: String,
    category: OpportunityCategory,
    nominal_value: f64,
    status: String,
    description: String,
) -> Result<SourceRecord, SourceError> {
    SourceRecord::new(reference, category, nominal_value, status, description)
        .map_err(|error| SourceError::invalid_response(error.to_string()))
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

fn array_at<'a>(payload: &'a Value, path: &str) -> Result<&'a Vec<Value>, SourceError> {
    lookup(payload, path)
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::invalid_response(format!("payload has no '{path}' array")))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn text(item: &Value, field: &str) -> Option<String> {
    item.get(field).and_then(as_text)
}

fn required_text(item: &Value, field: &str) -> Result<String, SourceError> {
    text(item, field)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| SourceError::invalid_response(format!("record is missing '{field}'")))
}

/// Reads a number or a numeric string; `1.234,56` is read as `1234.56`.
fn amount(item: &Value, field: &str) -> Result<f64, SourceError> {
    let invalid = || SourceError::invalid_response(format!("'{field}' is not a valid amount"));
    match item.get(field) {
        Some(Value::Number(number)) => number.as_f64().ok_or_else(invalid),
        Some(Value::String(raw)) => {
            let raw = raw.trim();
            let normalized = if raw.contains(',') {
                raw.replace('.', "").replace(',', ".")
            } else {
                raw.to_owned()
            };
            normalized.parse::<f64>().map_err(|_| invalid())
        }
        _ => Err(SourceError::invalid_response(format!(
            "record is missing '{field}'"
        ))),
    }
}
