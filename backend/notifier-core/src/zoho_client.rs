// src/zoho_client.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

// Module names as configured in the CRM
pub const MODULE_ABSENCES: &str = "absences";
pub const MODULE_DEALS: &str = "Deals";
pub const MODULE_CONTACTS: &str = "Contacts";
pub const MODULE_ABSENCE_NOTIFICATIONS: &str = "Absence_Notifications";
pub const RELATED_CONTACT_ROLES: &str = "Contact_Roles";

pub const DEAL_FIELDS: [&str; 3] = ["id", "Contact_Name", "Ma_nahmenummer1"];
pub const CONTACT_FIELDS: [&str; 6] = [
    "Full_Name",
    "Mailing_Street",
    "Mailing_Zip",
    "Mailing_City",
    "Account_Nummer",
    "Account_Name",
];
pub const CONTACT_ROLE_FIELDS: [&str; 3] = ["id", "Contact_Role", "Email"];

// --- Zoho Module Types ---

/// Lookup field value as returned by the CRM (`{ "id": ..., "name": ... }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RecordRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub deal: Option<RecordRef>,
}

impl Absence {
    pub fn deal_id(&self) -> Option<&str> {
        self.deal.as_ref().map(|deal| deal.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    #[serde(rename = "Contact_Name", default)]
    pub contact_name: Option<RecordRef>,
    #[serde(rename = "Ma_nahmenummer1", default)]
    pub measure_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "Full_Name", default)]
    pub full_name: Option<String>,
    #[serde(rename = "Mailing_Street", default)]
    pub mailing_street: Option<String>,
    #[serde(rename = "Mailing_Zip", default)]
    pub mailing_zip: Option<String>,
    #[serde(rename = "Mailing_City", default)]
    pub mailing_city: Option<String>,
    // Number or string depending on the field configuration
    #[serde(rename = "Account_Nummer", default)]
    pub account_number: Option<Value>,
}

impl Contact {
    pub fn account_number_text(&self) -> Option<String> {
        match self.account_number.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRole {
    pub id: String,
    #[serde(rename = "Contact_Role", default)]
    pub contact_role: Option<RecordRef>,
    #[serde(rename = "Email", default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Created,
    LinkedWithAbsences,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsenceNotification {
    pub id: String,
    #[serde(default)]
    pub deal: Option<RecordRef>,
    #[serde(rename = "Start_Date", default)]
    pub start_date: Option<NaiveDate>,
    #[serde(rename = "End_Date", default)]
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "Period_Absences_count_in_days", default)]
    pub period_absence_days: Option<i64>,
    #[serde(rename = "Total_Absences_Count_in_days", default)]
    pub total_absence_days: Option<i64>,
    #[serde(rename = "Status", default)]
    pub status: Option<NotificationStatus>,
}

impl AbsenceNotification {
    pub fn deal_id(&self) -> Option<&str> {
        self.deal.as_ref().map(|deal| deal.id.as_str())
    }
}

/// Payload for creating an absence notification record.
#[derive(Debug, Clone, Serialize)]
pub struct NewAbsenceNotification {
    #[serde(rename = "Name")]
    pub name: String,
    pub deal: RecordRef,
    #[serde(rename = "Start_Date")]
    pub start_date: NaiveDate,
    #[serde(rename = "End_Date")]
    pub end_date: NaiveDate,
    #[serde(rename = "BA_Responsible")]
    pub ba_responsible: String,
    #[serde(rename = "Status")]
    pub status: NotificationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbsenceLink {
    #[serde(rename = "Absences")]
    pub absence: RecordRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkAbsencesUpdate {
    pub id: String,
    #[serde(rename = "Absences")]
    pub absences: Vec<AbsenceLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationCountsUpdate {
    pub id: String,
    #[serde(rename = "Period_Absences_count_in_days")]
    pub period_absence_days: i64,
    #[serde(rename = "Total_Absences_Count_in_days")]
    pub total_absence_days: i64,
    #[serde(rename = "Status")]
    pub status: NotificationStatus,
}

// --- Write responses ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteDetails {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: WriteDetails,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl WriteResult {
    pub fn is_error(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("error"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RecordsEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

// Error body returned by the connector / CRM
#[derive(Debug, Clone, Deserialize)]
struct ZohoErrorPayload {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// --- Errors ---

#[derive(Error, Debug)]
pub enum ZohoError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Zoho connector error: Status={status}, Message='{message}'")]
    Api { status: StatusCode, message: String },

    #[error("Zoho rejected write to {module}: Code={code}, Message='{message}'")]
    Rejected {
        module: String,
        code: String,
        message: String,
    },

    #[error("Create in module {module} returned no record id")]
    MissingCreatedId { module: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

// --- Record Store Contract ---

/// Generic access to the remote record store. Records travel as JSON objects;
/// use [`decode_records`] to turn them into the module types above.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn search(&self, module: &str, criteria: &str) -> Result<Vec<Value>, ZohoError>;

    async fn get(
        &self,
        module: &str,
        ids: &[String],
        fields: &[&str],
    ) -> Result<Vec<Value>, ZohoError>;

    async fn get_by_id(
        &self,
        module: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<Value>, ZohoError>;

    async fn related(
        &self,
        module: &str,
        id: &str,
        related_module: &str,
        fields: &[&str],
    ) -> Result<Vec<Value>, ZohoError>;

    async fn create(&self, module: &str, data: Vec<Value>) -> Result<Vec<WriteResult>, ZohoError>;

    async fn update(&self, module: &str, data: Vec<Value>) -> Result<Vec<WriteResult>, ZohoError>;
}

pub fn decode_records<T: DeserializeOwned>(records: Vec<Value>) -> Result<Vec<T>, ZohoError> {
    records
        .into_iter()
        .map(|record| serde_json::from_value(record).map_err(ZohoError::from))
        .collect()
}

/// Fails on the first per-record result the CRM reports with status `error`.
pub fn ensure_written(module: &str, results: Vec<WriteResult>) -> Result<Vec<WriteResult>, ZohoError> {
    match results.iter().find(|result| result.is_error()) {
        Some(rejected) => {
            let code = rejected.code.clone().unwrap_or_else(|| "UNKNOWN".to_string());
            let message = rejected.message.clone().unwrap_or_default();
            error!("Write to {} rejected: {} {}", module, code, message);
            Err(ZohoError::Rejected {
                module: module.to_string(),
                code,
                message,
            })
        }
        None => Ok(results),
    }
}

pub fn encode_record<T: Serialize>(record: &T) -> Result<Value, ZohoError> {
    Ok(serde_json::to_value(record)?)
}

// --- Connector Client Implementation ---

#[derive(Clone, Debug)]
pub struct ZohoConnectorConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone)]
pub struct ZohoConnectorClient {
    http_client: Client,
    base_url: Url,
}

impl ZohoConnectorClient {
    pub fn new(config: &ZohoConnectorConfig) -> Result<Self, ZohoError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ZohoError::Config(format!(
                "Connector URL cannot be used as a base: {}",
                config.base_url
            )));
        }
        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// `{base}/crm/{segments...}`
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ZohoError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ZohoError::Config("Connector URL cannot be a base".to_string()))?
            .pop_if_empty()
            .push("crm")
            .extend(segments);
        Ok(url)
    }

    fn build_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
    }

    async fn send_and_deserialize<T: DeserializeOwned + Default>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, ZohoError> {
        let request = request_builder.build()?;
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let response = self.http_client.execute(request).await.map_err(|e| {
            error!("Request for '{}' (URL: {}) failed: {}", context_msg, request_url, e);
            ZohoError::Request(e)
        })?;
        let status = response.status();
        info!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        let bytes = response.bytes().await?;

        if status.is_success() {
            // The CRM answers "no records" with 204 and an empty body
            if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
                debug!("Empty response body for '{}'", context_msg);
                return Ok(T::default());
            }
            serde_json::from_slice::<T>(&bytes).map_err(|e| {
                error!(
                    "JSON deserialization failed for '{}' (URL: {}): {}",
                    context_msg, request_url, e
                );
                ZohoError::Json(e)
            })
        } else {
            let body = String::from_utf8_lossy(&bytes).to_string();
            let message = match serde_json::from_slice::<ZohoErrorPayload>(&bytes) {
                Ok(payload) => match (payload.code, payload.message) {
                    (Some(code), Some(message)) => format!("{}: {}", code, message),
                    (None, Some(message)) => message,
                    (Some(code), None) => code,
                    (None, None) => body,
                },
                Err(_) => body,
            };
            warn!(
                "Zoho connector request '{}' failed. Status: {}, Message: {}",
                context_msg, status, message
            );
            Err(ZohoError::Api { status, message })
        }
    }
}

#[async_trait]
impl RecordStore for ZohoConnectorClient {
    async fn search(&self, module: &str, criteria: &str) -> Result<Vec<Value>, ZohoError> {
        let mut url = self.endpoint(&[module, "search"])?;
        url.query_pairs_mut().append_pair("criteria", criteria);
        let envelope: RecordsEnvelope<Value> = self
            .send_and_deserialize(
                self.build_request(Method::GET, url),
                &format!("search {}", module),
            )
            .await?;
        Ok(envelope.data)
    }

    async fn get(
        &self,
        module: &str,
        ids: &[String],
        fields: &[&str],
    ) -> Result<Vec<Value>, ZohoError> {
        let mut url = self.endpoint(&[module])?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("fields", &fields.join(","));
        let envelope: RecordsEnvelope<Value> = self
            .send_and_deserialize(
                self.build_request(Method::GET, url),
                &format!("get {}", module),
            )
            .await?;
        Ok(envelope.data)
    }

    async fn get_by_id(
        &self,
        module: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<Value>, ZohoError> {
        let mut url = self.endpoint(&[module, id])?;
        url.query_pairs_mut().append_pair("fields", &fields.join(","));
        let envelope: RecordsEnvelope<Value> = self
            .send_and_deserialize(
                self.build_request(Method::GET, url),
                &format!("get {} by id", module),
            )
            .await?;
        Ok(envelope.data.into_iter().next())
    }

    async fn related(
        &self,
        module: &str,
        id: &str,
        related_module: &str,
        fields: &[&str],
    ) -> Result<Vec<Value>, ZohoError> {
        let mut url = self.endpoint(&[module, id, related_module])?;
        url.query_pairs_mut().append_pair("fields", &fields.join(","));
        let envelope: RecordsEnvelope<Value> = self
            .send_and_deserialize(
                self.build_request(Method::GET, url),
                &format!("related {} of {}", related_module, module),
            )
            .await?;
        Ok(envelope.data)
    }

    async fn create(&self, module: &str, data: Vec<Value>) -> Result<Vec<WriteResult>, ZohoError> {
        let url = self.endpoint(&[module])?;
        let body = serde_json::json!({ "data": data });
        let envelope: RecordsEnvelope<WriteResult> = self
            .send_and_deserialize(
                self.build_request(Method::POST, url).json(&body),
                &format!("create {}", module),
            )
            .await?;
        Ok(envelope.data)
    }

    async fn update(&self, module: &str, data: Vec<Value>) -> Result<Vec<WriteResult>, ZohoError> {
        let url = self.endpoint(&[module])?;
        let body = serde_json::json!({ "data": data });
        let envelope: RecordsEnvelope<WriteResult> = self
            .send_and_deserialize(
                self.build_request(Method::PUT, url).json(&body),
                &format!("update {}", module),
            )
            .await?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> ZohoConnectorClient {
        ZohoConnectorClient::new(&ZohoConnectorConfig {
            base_url: base.to_string(),
            timeout_secs: 5,
        })
        .expect("Failed to create test client")
    }

    #[test]
    fn endpoint_appends_crm_segments() {
        let client = client("http://localhost:4000/api/");
        let url = client.endpoint(&["Deals", "42", "Contact_Roles"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4000/api/crm/Deals/42/Contact_Roles");

        let client = client_without_slash();
        let url = client.endpoint(&["absences", "search"]).unwrap();
        assert_eq!(url.as_str(), "http://connector.internal/crm/absences/search");
    }

    fn client_without_slash() -> ZohoConnectorClient {
        client("http://connector.internal")
    }

    #[test]
    fn rejects_non_base_url() {
        let result = ZohoConnectorClient::new(&ZohoConnectorConfig {
            base_url: "mailto:crm@example.com".to_string(),
            timeout_secs: 5,
        });
        assert!(matches!(result, Err(ZohoError::Config(_))));
    }

    #[test]
    fn absence_decodes_zoho_shape() {
        let records = vec![
            json!({
                "id": "A1",
                "reason": "Krank",
                "type": "sick",
                "start_date": "2024-06-03",
                "end_date": "2024-06-05",
                "deal": { "id": "D1", "name": "Deal One" }
            }),
            json!({ "id": "A2", "reason": null, "start_date": null }),
        ];
        let absences: Vec<Absence> = decode_records(records).unwrap();
        assert_eq!(absences[0].deal_id(), Some("D1"));
        assert_eq!(
            absences[0].start_date,
            NaiveDate::from_ymd_opt(2024, 6, 3)
        );
        assert_eq!(absences[1].deal_id(), None);
        assert_eq!(absences[1].reason, None);
        assert_eq!(absences[1].end_date, None);
    }

    #[test]
    fn rejected_write_results_become_errors() {
        let results: Vec<WriteResult> = decode_records(vec![
            json!({ "code": "SUCCESS", "details": { "id": "N1" }, "status": "success" }),
            json!({
                "code": "INVALID_DATA",
                "details": {},
                "message": "invalid data",
                "status": "error"
            }),
        ])
        .unwrap();

        match ensure_written(MODULE_ABSENCE_NOTIFICATIONS, results) {
            Err(ZohoError::Rejected { module, code, message }) => {
                assert_eq!(module, MODULE_ABSENCE_NOTIFICATIONS);
                assert_eq!(code, "INVALID_DATA");
                assert_eq!(message, "invalid data");
            }
            other => panic!("Expected rejection, got {:?}", other),
        }

        let accepted = ensure_written(MODULE_DEALS, vec![WriteResult::default()]).unwrap();
        assert_eq!(accepted.len(), 1);
    }

    #[test]
    fn contact_account_number_accepts_number_or_string() {
        let contact: Contact = serde_json::from_value(json!({ "Account_Nummer": 1234 })).unwrap();
        assert_eq!(contact.account_number_text().as_deref(), Some("1234"));
        let contact: Contact =
            serde_json::from_value(json!({ "Account_Nummer": "K-77" })).unwrap();
        assert_eq!(contact.account_number_text().as_deref(), Some("K-77"));
        let contact: Contact = serde_json::from_value(json!({ "Account_Nummer": null })).unwrap();
        assert_eq!(contact.account_number_text(), None);
    }

    #[test]
    fn notification_status_wire_names() {
        let update = NotificationCountsUpdate {
            id: "N1".to_string(),
            period_absence_days: 3,
            total_absence_days: 10,
            status: NotificationStatus::LinkedWithAbsences,
        };
        let value = encode_record(&update).unwrap();
        assert_eq!(value["Status"], "LINKED_WITH_ABSENCES");
        assert_eq!(value["Total_Absences_Count_in_days"], 10);

        let status: NotificationStatus = serde_json::from_value(json!("Archived")).unwrap();
        assert_eq!(status, NotificationStatus::Unknown);
    }

    #[test]
    fn link_update_uses_subform_shape() {
        let update = LinkAbsencesUpdate {
            id: "N1".to_string(),
            absences: vec![AbsenceLink {
                absence: RecordRef::id("A1"),
            }],
        };
        let value = encode_record(&update).unwrap();
        assert_eq!(value, json!({ "id": "N1", "Absences": [ { "Absences": { "id": "A1" } } ] }));
    }
}
