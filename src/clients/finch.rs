//! Finch client: employer directory and individual details.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ClientError, check_status, http_client};

const SERVICE: &str = "finch";

/// Directory entry for one person on the employer's roster.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinchIndividual {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Personal details; only the fields the roster sync needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FinchIndividualDetail {
    pub id: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait FinchApi: Send + Sync {
    /// One page of the employer directory.
    async fn directory(
        &self,
        access_token: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FinchIndividual>, ClientError>;

    async fn individuals(
        &self,
        access_token: &str,
        ids: &[String],
    ) -> Result<Vec<FinchIndividualDetail>, ClientError>;
}

pub struct FinchClient {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    individuals: Vec<FinchIndividual>,
}

#[derive(Debug, Deserialize)]
struct IndividualResponses {
    #[serde(default)]
    responses: Vec<IndividualResponse>,
}

#[derive(Debug, Deserialize)]
struct IndividualResponse {
    individual_id: String,
    #[serde(default)]
    body: Option<IndividualBody>,
}

#[derive(Debug, Deserialize)]
struct IndividualBody {
    #[serde(default)]
    emails: Option<Vec<FinchEmail>>,
}

#[derive(Debug, Deserialize)]
struct FinchEmail {
    data: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Prefer the work address; fall back to whatever is listed first.
fn pick_email(emails: Vec<FinchEmail>) -> Option<String> {
    let work = emails
        .iter()
        .position(|email| email.kind.as_deref() == Some("work"));
    let index = work.unwrap_or(0);
    emails
        .into_iter()
        .nth(index)
        .map(|email| email.data.trim().to_lowercase())
        .filter(|email| !email.is_empty())
}

impl From<IndividualResponse> for FinchIndividualDetail {
    fn from(response: IndividualResponse) -> Self {
        let email = response
            .body
            .and_then(|body| body.emails)
            .and_then(pick_email);
        Self {
            id: response.individual_id,
            email,
        }
    }
}

impl FinchClient {
    pub fn new(base_url: &str, api_version: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
        }
    }
}

#[async_trait]
impl FinchApi for FinchClient {
    async fn directory(
        &self,
        access_token: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FinchIndividual>, ClientError> {
        let response = self
            .client
            .get(format!("{}/employer/directory", self.base_url))
            .bearer_auth(access_token)
            .header("Finch-API-Version", &self.api_version)
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await
            .map_err(|source| ClientError::Http {
                service: SERVICE,
                source,
            })?;

        let page: DirectoryResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Malformed {
                service: SERVICE,
                message: e.to_string(),
            })?;

        Ok(page.individuals)
    }

    async fn individuals(
        &self,
        access_token: &str,
        ids: &[String],
    ) -> Result<Vec<FinchIndividualDetail>, ClientError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<_> = ids
            .iter()
            .map(|id| json!({ "individual_id": id }))
            .collect();

        let response = self
            .client
            .post(format!("{}/employer/individual", self.base_url))
            .bearer_auth(access_token)
            .header("Finch-API-Version", &self.api_version)
            .json(&json!({ "requests": requests }))
            .send()
            .await
            .map_err(|source| ClientError::Http {
                service: SERVICE,
                source,
            })?;

        let body: IndividualResponses = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Malformed {
                service: SERVICE,
                message: e.to_string(),
            })?;

        Ok(body.responses.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_email_wins_over_personal() {
        let response: IndividualResponses = serde_json::from_value(json!({
            "responses": [{
                "individual_id": "ind-1",
                "code": 200,
                "body": {
                    "emails": [
                        { "data": "me@home.net", "type": "personal" },
                        { "data": " Jane.Doe@Acme.com ", "type": "work" }
                    ]
                }
            }]
        }))
        .unwrap();

        let details: Vec<FinchIndividualDetail> =
            response.responses.into_iter().map(Into::into).collect();
        assert_eq!(details[0].email.as_deref(), Some("jane.doe@acme.com"));
    }

    #[test]
    fn missing_emails_yield_none() {
        let response: IndividualResponse = serde_json::from_value(json!({
            "individual_id": "ind-2",
            "body": { "emails": null }
        }))
        .unwrap();
        assert_eq!(FinchIndividualDetail::from(response).email, None);
    }

    #[test]
    fn directory_tolerates_sparse_entries() {
        let page: DirectoryResponse = serde_json::from_value(json!({
            "paging": { "count": 2, "offset": 0 },
            "individuals": [
                { "id": "a", "first_name": "Ana", "last_name": "Ruiz", "is_active": true },
                { "id": "b" }
            ]
        }))
        .unwrap();

        assert_eq!(page.individuals.len(), 2);
        assert_eq!(page.individuals[1].is_active, None);
    }
}
