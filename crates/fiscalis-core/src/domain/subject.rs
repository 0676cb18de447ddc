use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const CPF_LEN: usize = 11;
const CNPJ_LEN: usize = 14;

/// Kind of taxpayer document a subject id carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// Individual taxpayer (11 digits).
    Cpf,
    /// Legal entity (14 digits).
    Cnpj,
}

impl SubjectKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpf => "cpf",
            Self::Cnpj => "cnpj",
        }
    }
}

/// Normalized taxpayer identifier (CPF or CNPJ, digits only).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    /// Parses a subject id, stripping the usual `.`, `/`, `-` and space separators.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySubject);
        }

        let mut digits = String::with_capacity(CNPJ_LEN);
        for (index, ch) in trimmed.chars().enumerate() {
            match ch {
                '0'..='9' => digits.push(ch),
                '.' | '/' | '-' | ' ' => {}
                _ => return Err(ValidationError::SubjectInvalidChar { ch, index }),
            }
        }

        match digits.len() {
            CPF_LEN | CNPJ_LEN => Ok(Self(digits)),
            len => Err(ValidationError::SubjectLength { len }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> SubjectKind {
        if self.0.len() == CPF_LEN {
            SubjectKind::Cpf
        } else {
            SubjectKind::Cnpj
        }
    }

    /// Stable seed derived from the digits, used by simulated providers.
    pub fn seed(&self) -> u64 {
        self.0.bytes().fold(17_u64, |acc, byte| {
            acc.wrapping_mul(31).wrapping_add(u64::from(byte))
        })
    }
}

impl Display for SubjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SubjectId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for SubjectId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_cnpj_punctuation() {
        let subject = SubjectId::parse("12.345.678/0001-90").expect("cnpj should parse");
        assert_eq!(subject.as_str(), "12345678000190");
        assert_eq!(subject.kind(), SubjectKind::Cnpj);
    }

    #[test]
    fn accepts_cpf() {
        let subject = SubjectId::parse("123.456.789-09").expect("cpf should parse");
        assert_eq!(subject.kind(), SubjectKind::Cpf);
    }

    #[test]
    fn rejects_letters() {
        let err = SubjectId::parse("12A45678000190").expect_err("must fail");
        assert_eq!(err, ValidationError::SubjectInvalidChar { ch: 'A', index: 2 });
    }

    #[test]
    fn rejects_wrong_length() {
        let err = SubjectId::parse("123456").expect_err("must fail");
        assert_eq!(err, ValidationError::SubjectLength { len: 6 });
    }
}
