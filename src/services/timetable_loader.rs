use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use crate::config::TimetableConfig;
use crate::errors::{FetchError, FetchResult};
use crate::models::{ElementType, Period, Timetable, TimetableElement, User};
use super::collaborators::{TimetableCache, TimetableFetcher};

const METHOD_GET_TIMETABLE: &str = "getTimetable2017";
const ANONYMOUS_USER: &str = "#anonymous#";

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<TimetableResult>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct TimetableResult {
    timetable: RawTimetable,
}

#[derive(Deserialize)]
struct RawTimetable {
    #[serde(default)]
    periods: Vec<RawPeriod>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeriod {
    id: i64,
    #[serde(deserialize_with = "deserialize_local_time")]
    start_date_time: NaiveDateTime,
    #[serde(deserialize_with = "deserialize_local_time")]
    end_date_time: NaiveDateTime,
    #[serde(default)]
    elements: Vec<RawPeriodElement>,
    #[serde(default, rename = "is")]
    flags: PeriodFlags,
}

#[derive(Deserialize)]
struct RawPeriodElement {
    #[serde(rename = "type")]
    element_type: String,
    name: Option<String>,
}

#[derive(Deserialize, Default)]
struct PeriodFlags {
    #[serde(default)]
    cancelled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimetableParams<'a> {
    id: i64,
    #[serde(rename = "type")]
    element_type: ElementType,
    start_date: NaiveDate,
    end_date: NaiveDate,
    master_data_timestamp: i64,
    auth: Auth<'a>,
}

#[derive(Serialize)]
struct Auth<'a> {
    user: &'a str,
    key: Option<&'a str>,
}

// The server omits seconds ("2024-03-04T08:00"); accept both forms.
fn deserialize_local_time<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| serde::de::Error::custom(format!("invalid date-time {:?}: {}", raw, e)))
}

fn names_of(elements: &[RawPeriodElement], element_type: &str) -> Vec<String> {
    elements
        .iter()
        .filter(|e| e.element_type == element_type)
        .filter_map(|e| e.name.clone())
        .collect()
}

/// Turns a JSON-RPC response body into a `Timetable`.
fn parse_timetable_response(
    body: &str,
    user_id: i64,
    element: TimetableElement,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> FetchResult<Timetable> {
    let response: RpcResponse = serde_json::from_str(body)?;

    if let Some(error) = response.error {
        return Err(FetchError::from_rpc(error.code, error.message));
    }

    let result = response.result.ok_or_else(|| FetchError::Api {
        code: 0,
        message: "response carries neither result nor error".into(),
    })?;

    let periods = result
        .timetable
        .periods
        .into_iter()
        .map(|raw| Period {
            id: raw.id,
            subjects: names_of(&raw.elements, "SUBJECT"),
            rooms: names_of(&raw.elements, "ROOM"),
            start_date_time: raw.start_date_time,
            end_date_time: raw.end_date_time,
            is_cancelled: raw.flags.cancelled,
        })
        .collect();

    Ok(Timetable {
        user_id,
        element,
        start_date,
        end_date,
        periods,
        fetched_at: Utc::now(),
    })
}

/// Fetches timetables over the school server's JSON-RPC API and writes them
/// through to the timetable cache.
pub struct TimetableLoader {
    http: reqwest::Client,
    cache: Arc<dyn TimetableCache>,
    range_days: u32,
}

impl TimetableLoader {
    pub fn new(config: &TimetableConfig, cache: Arc<dyn TimetableCache>) -> FetchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            cache,
            range_days: config.range_days,
        })
    }
}

#[async_trait]
impl TimetableFetcher for TimetableLoader {
    async fn load_timetable(&self, user: &User, element: &TimetableElement) -> FetchResult<Timetable> {
        let start_date = Local::now().date_naive();
        let end_date = start_date
            .checked_add_days(Days::new(u64::from(self.range_days)))
            .unwrap_or(start_date);

        let params = TimetableParams {
            id: element.id,
            element_type: element.element_type,
            start_date,
            end_date,
            master_data_timestamp: 0,
            auth: Auth {
                user: user.user_name.as_deref().unwrap_or(ANONYMOUS_USER),
                key: user.key.as_deref(),
            },
        };
        let request = json!({
            "id": Uuid::new_v4().to_string(),
            "jsonrpc": "2.0",
            "method": METHOD_GET_TIMETABLE,
            "params": [params],
        });

        tracing::debug!(
            user_id = user.id,
            element_type = %element.element_type,
            element_id = element.id,
            %start_date,
            %end_date,
            "Requesting timetable"
        );

        let body = self
            .http
            .post(&user.api_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let timetable = parse_timetable_response(&body, user.id, *element, start_date, end_date)?;
        self.cache.store_timetable(&timetable).await?;

        tracing::info!(
            user_id = user.id,
            periods = timetable.periods.len(),
            "Timetable cached"
        );
        Ok(timetable)
    }
}
