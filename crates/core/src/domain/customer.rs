use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Customer block carried on a quote. Only the name is mandatory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

impl CustomerDetails {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), email: None, company: None }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Trims every field, drops blank optionals and rejects a missing name or malformed email.
    pub fn normalized(self) -> Result<Self, DomainError> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(DomainError::validation("customer.name", "is required"));
        }

        let email = non_blank(self.email);
        if let Some(email) = &email {
            let well_formed = email
                .split_once('@')
                .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
                .unwrap_or(false);
            if !well_formed {
                return Err(DomainError::validation(
                    "customer.email",
                    format!("`{email}` is not a valid email address"),
                ));
            }
        }

        Ok(Self { name, email, company: non_blank(self.company) })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::CustomerDetails;
    use crate::errors::DomainError;

    #[test]
    fn normalization_trims_and_drops_blank_optionals() {
        let customer = CustomerDetails {
            name: "  Acme  ".to_owned(),
            email: Some("  ".to_owned()),
            company: Some(" Acme Industries ".to_owned()),
        }
        .normalized()
        .expect("valid customer");

        assert_eq!(customer.name, "Acme");
        assert_eq!(customer.email, None);
        assert_eq!(customer.company.as_deref(), Some("Acme Industries"));
    }

    #[test]
    fn missing_name_is_rejected_with_field() {
        let error = CustomerDetails::new("   ").normalized().expect_err("blank name");
        assert!(matches!(error, DomainError::Validation { ref field, .. } if field == "customer.name"));
    }

    #[test]
    fn malformed_email_is_rejected() {
        let error = CustomerDetails::new("Acme")
            .with_email("not-an-email")
            .normalized()
            .expect_err("bad email");
        assert!(matches!(error, DomainError::Validation { ref field, .. } if field == "customer.email"));
    }
}
