use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::model::{log_keys, row_f64, EventLogRecord, EventType, LogRow};

use super::{
    record_call, ErrorCode, EventInput, EventOutput, SampleWorker, StepError, WebTriggerInput,
    WebTriggerOutput, WorkerError, COST_RAISING_FACTOR,
};

impl SampleWorker {
    /// Turns a tracking-link hit into an event row. Clicks are charged at the
    /// logged bid price times [`COST_RAISING_FACTOR`].
    pub async fn on_event(&self, input: &EventInput) -> Result<EventOutput, WorkerError> {
        let result = self
            .event_record(input)
            .await
            .map_err(|err| err.into_worker_error(ErrorCode::OnEvent, "event"));
        record_call("event", if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn event_record(&self, input: &EventInput) -> Result<EventOutput, StepError> {
        let event_type = input.params.event_type;
        if event_type <= 0 {
            debug!(event_type, "ignoring non-positive event type");
            return Ok(EventOutput::default());
        }

        let mut data = LogRow::new();
        if event_type == EventType::Click.code() {
            let request = self
                .ports
                .request_logs
                .find_request_log(input.query_id)
                .await?;
            let bid_price = request
                .as_ref()
                .and_then(|log| log.row(0))
                .and_then(|row| row_f64(row, log_keys::BID_PRICE))
                .unwrap_or_else(|| {
                    warn!(query_id = input.query_id.get(), "click without a logged bid price");
                    0.0
                });
            data.insert(
                log_keys::CLICK_COST.into(),
                Value::from(bid_price * COST_RAISING_FACTOR),
            );
        }

        Ok(EventOutput {
            record: Some(EventLogRecord {
                query_id: input.query_id,
                row_index: 0,
                event_type,
                data,
            }),
        })
    }

    /// Attributes a web conversion to the most recent impression or click
    /// whose landing page equals the destination URL.
    pub async fn on_web_trigger(
        &self,
        input: &WebTriggerInput,
    ) -> Result<WebTriggerOutput, WorkerError> {
        debug!(
            destination = %input.destination_url,
            app = %input.app_package_name,
            "web trigger received"
        );
        let found = match self
            .latest_event_with(log_keys::LANDING_PAGE, &input.destination_url)
            .await
        {
            Ok(found) => found,
            Err(err) => {
                record_call("web_trigger", "error");
                return Err(StepError::from(err).into_worker_error(ErrorCode::OnWebTrigger, "web_trigger"));
            }
        };

        let mut output = WebTriggerOutput::default();
        if let Some(event) = found {
            let mut data = LogRow::new();
            data.insert(log_keys::SOURCE_TYPE.into(), Value::from(event.event_type));
            data.insert(
                log_keys::WEB_TRIGGER_DATA.into(),
                Value::from(STANDARD.encode(&input.data)),
            );
            info!(
                query_id = event.query_id.get(),
                source_type = event.event_type,
                "web conversion attributed"
            );
            output.event_records.push(EventLogRecord {
                query_id: event.query_id,
                row_index: event.row_index,
                event_type: EventType::WebConversion.code(),
                data,
            });
        }
        record_call("web_trigger", "ok");
        Ok(output)
    }
}
