//! Maps reconciliation outcomes to the shopper's landing page.

use url::Url;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::reconciliation::{OutcomeKind, ReconcileOutcome};

#[derive(Debug, Clone)]
pub struct OutcomeResponder {
    frontend_base: Url,
    deep_link_scheme: Option<String>,
}

impl OutcomeResponder {
    pub fn new(frontend_base_url: &str, deep_link_scheme: Option<String>) -> Result<Self, ServiceError> {
        let frontend_base = Url::parse(frontend_base_url).map_err(|e| {
            ServiceError::InternalError(format!("invalid frontend_base_url {}: {}", frontend_base_url, e))
        })?;
        Ok(Self {
            frontend_base,
            deep_link_scheme: deep_link_scheme.filter(|s| !s.is_empty()),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(&config.frontend_base_url, config.app_deep_link_scheme.clone())
    }

    /// Landing page for `outcome`. `app` selects the deep link when one is configured.
    pub fn destination(&self, outcome: &ReconcileOutcome, app: bool) -> String {
        let page = page_for(outcome.kind);

        let mut url = match self.deep_link_scheme.as_deref().filter(|_| app) {
            Some(scheme) => match Url::parse(&format!("{}://payment/{}", scheme, page)) {
                Ok(url) => url,
                Err(_) => self.web_url(page),
            },
            None => self.web_url(page),
        };

        {
            let mut query = url.query_pairs_mut();
            if let Some(order_id) = outcome.order_id {
                query.append_pair("order_id", &order_id.to_string());
            }
            if let Some(payment_id) = outcome.payment_id {
                query.append_pair("payment_id", &payment_id.to_string());
            }
            query.append_pair("reason", &outcome.reason.to_string());
        }
        url.into()
    }

    fn web_url(&self, page: &str) -> Url {
        let mut url = self.frontend_base.clone();
        let path = format!("{}/payment/{}", url.path().trim_end_matches('/'), page);
        url.set_path(&path);
        url.set_query(None);
        url
    }
}

fn page_for(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Success => "success",
        OutcomeKind::Pending => "pending",
        OutcomeKind::Failed => "failed",
        OutcomeKind::NotFound | OutcomeKind::Invalid => "invalid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reconciliation::Reason;
    use uuid::Uuid;

    fn outcome(kind: OutcomeKind, reason: Reason) -> ReconcileOutcome {
        ReconcileOutcome {
            kind,
            reason,
            order_id: Some(Uuid::nil()),
            payment_id: None,
            terminal: false,
            state: String::new(),
        }
    }

    #[test]
    fn web_destination_carries_ids_and_reason() {
        let responder = OutcomeResponder::new("https://shop.example/", None).unwrap();
        let url = responder.destination(&outcome(OutcomeKind::Success, Reason::Paid), false);
        assert_eq!(
            url,
            "https://shop.example/payment/success?order_id=00000000-0000-0000-0000-000000000000&reason=paid"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let responder = OutcomeResponder::new("https://shop.example/store", None).unwrap();
        let url = responder.destination(&ReconcileOutcome::unknown(), false);
        assert_eq!(
            url,
            "https://shop.example/store/payment/invalid?reason=unknown_reference"
        );
    }

    #[test]
    fn app_variant_uses_deep_link_only_when_configured() {
        let pending = outcome(OutcomeKind::Pending, Reason::GatewayUnreachable);

        let with_scheme =
            OutcomeResponder::new("https://shop.example", Some("futsalapp".into())).unwrap();
        assert!(with_scheme
            .destination(&pending, true)
            .starts_with("futsalapp://payment/pending?"));
        assert!(with_scheme
            .destination(&pending, false)
            .starts_with("https://shop.example/payment/pending?"));

        let without = OutcomeResponder::new("https://shop.example", None).unwrap();
        assert!(without
            .destination(&pending, true)
            .starts_with("https://shop.example/payment/pending?"));
    }

    #[test]
    fn rejects_unparseable_base() {
        assert!(OutcomeResponder::new("not a url", None).is_err());
    }
}
