use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::model::{
    key_prefix, log_keys, Ad, EventLogRecord, EventType, LogRow, RequestLogRecord,
    TrainingInterval,
};

use super::{
    record_call, ErrorCode, ExecuteInput, ExecuteOutput, SampleWorker, StepError, WorkerError,
};

const ONE_TIME_TRAINING_DELAY: Duration = Duration::from_secs(10);

/// An ad with the price it bid in the auction.
#[derive(Debug, Clone)]
struct Bid {
    ad: Arc<Ad>,
    price: f64,
}

impl SampleWorker {
    pub async fn on_execute(&self, input: &ExecuteInput) -> Result<ExecuteOutput, WorkerError> {
        let params = &input.app_params;
        let keyword = params.keyword.as_deref();
        if keyword.is_some_and(|k| k.eq_ignore_ascii_case("crash")) {
            record_call("execute", "crash");
            return Err(WorkerError::ClientRequestedCrash);
        }
        if keyword.is_some_and(|k| k.eq_ignore_ascii_case("error")) {
            record_call("execute", "injected_error");
            return Err(WorkerError::isolated(
                ErrorCode::InjectedError,
                "client-requested error",
            ));
        }

        let result = if let Some(population) = params.schedule_training.as_deref() {
            self.schedule_training(population, params.schedule_interval)
                .await
        } else if let Some(population) = params.cancel_training.as_deref() {
            self.cancel_training(population).await
        } else if let Some(ad_id) = params.conversion_ad_id.as_deref() {
            self.attribute_conversion(ad_id).await
        } else {
            self.serve_ad(input)
                .await
                .map_err(|err| err.into_worker_error(ErrorCode::OnExecute, "execute"))
        };

        record_call("execute", if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn schedule_training(
        &self,
        population: &str,
        interval_secs: Option<i64>,
    ) -> Result<ExecuteOutput, WorkerError> {
        if population.is_empty() {
            return Err(illegal_argument("schedule_training"));
        }
        let interval = match interval_secs {
            Some(secs) if secs > 0 => {
                debug!(population, secs, "scheduling recurrent training");
                TrainingInterval::recurrent(Duration::from_secs(secs as u64))
            }
            _ => TrainingInterval::one_time(ONE_TIME_TRAINING_DELAY),
        };
        self.ports
            .scheduler
            .schedule(population, interval)
            .await
            .map_err(|err| StepError::from(err).into_worker_error(ErrorCode::OnExecute, "execute"))?;
        info!(population, mode = interval.mode.as_ref(), "training scheduled");
        Ok(ExecuteOutput::default())
    }

    async fn cancel_training(&self, population: &str) -> Result<ExecuteOutput, WorkerError> {
        if population.is_empty() {
            return Err(illegal_argument("cancel_training"));
        }
        let cancelled = self
            .ports
            .scheduler
            .cancel(population)
            .await
            .map_err(|err| StepError::from(err).into_worker_error(ErrorCode::OnExecute, "execute"))?;
        info!(population, cancelled, "training cancelled");
        Ok(ExecuteOutput::default())
    }

    /// Attributes a conversion to the most recent event whose request row
    /// served `ad_id`.
    async fn attribute_conversion(&self, ad_id: &str) -> Result<ExecuteOutput, WorkerError> {
        if ad_id.is_empty() {
            return Err(illegal_argument("conversion_ad_id"));
        }
        let ad_id = ad_id.trim();
        let found = self
            .latest_event_with(log_keys::AD_ID, ad_id)
            .await
            .map_err(|err| StepError::from(err).into_worker_error(ErrorCode::OnExecute, "execute"))?;

        let mut output = ExecuteOutput::default();
        match found {
            Some(event) => {
                let mut data = LogRow::new();
                data.insert(log_keys::SOURCE_TYPE.into(), Value::from(event.event_type));
                output.event_records.push(EventLogRecord {
                    query_id: event.query_id,
                    row_index: event.row_index,
                    event_type: EventType::Conversion.code(),
                    data,
                });
                info!(ad_id, source_type = event.event_type, "conversion attributed");
            }
            None => debug!(ad_id, "no matching event for conversion"),
        }
        Ok(output)
    }

    async fn serve_ad(&self, input: &ExecuteInput) -> Result<ExecuteOutput, StepError> {
        let keyword = input
            .app_params
            .keyword
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        let ads = self.read_ads().await?;
        let matched: Vec<Arc<Ad>> = ads
            .into_iter()
            .filter(|ad| ad.matches(&keyword, &input.user_data))
            .collect();
        debug!(keyword = %keyword, matched = matched.len(), "ads matched");
        if matched.is_empty() {
            return Ok(ExecuteOutput::default());
        }

        let scores = self.ports.model_runner.run(&matched).await?;
        let Some(winner) = run_auction(&matched, &scores) else {
            debug!("no ad placed a positive bid");
            return Ok(ExecuteOutput::default());
        };

        info!(
            ad_id = %winner.ad.id,
            max_cpc = winner.ad.max_cpc,
            bid = winner.price,
            landing_page = %winner.ad.landing_page,
            "logging winning ad"
        );
        Ok(ExecuteOutput {
            request_log: Some(RequestLogRecord::single(winning_row(&winner))),
            rendering_keys: vec![winner.ad.id.clone()],
            event_records: Vec::new(),
        })
    }

    async fn read_ads(&self) -> Result<Vec<Arc<Ad>>, StepError> {
        let mut ads = Vec::new();
        for key in self.ports.remote_data.keys().await? {
            if !key.starts_with(key_prefix::AD) {
                continue;
            }
            let Some(data) = self.ports.remote_data.get(&key).await? else {
                continue;
            };
            match self.ads.get_or_parse(&key, &data) {
                Ok(ad) => ads.push(ad),
                Err(err) => warn!(key = %key, error = %err, "skipping unparseable ad"),
            }
        }
        Ok(ads)
    }
}

/// Bid is `max_cpc * score`; the strictly highest positive bid wins, so the
/// first of equal bids keeps the slot.
fn run_auction(ads: &[Arc<Ad>], scores: &[f32]) -> Option<Bid> {
    if scores.len() != ads.len() {
        error!(
            ads = ads.len(),
            scores = scores.len(),
            "prediction result doesn't match ads list"
        );
    }
    let mut winner: Option<Bid> = None;
    for (index, ad) in ads.iter().enumerate() {
        let score = scores.get(index).copied().unwrap_or_default();
        let price = ad.max_cpc * f64::from(score);
        let best = winner.as_ref().map_or(0.0, |bid| bid.price);
        if price > best {
            winner = Some(Bid {
                ad: ad.clone(),
                price,
            });
        }
    }
    winner
}

fn winning_row(winner: &Bid) -> LogRow {
    let mut row = LogRow::new();
    row.insert(log_keys::AD_ID.into(), Value::from(winner.ad.id.clone()));
    row.insert(log_keys::BID_PRICE.into(), Value::from(winner.ad.max_cpc));
    row.insert(log_keys::AUCTION_SCORE.into(), Value::from(winner.price));
    row.insert(
        log_keys::LANDING_PAGE.into(),
        Value::from(winner.ad.landing_page.clone()),
    );
    row
}

fn illegal_argument(param: &'static str) -> WorkerError {
    warn!(param, "empty app parameter");
    WorkerError::isolated(ErrorCode::IllegalArgument, format!("`{param}` must not be empty"))
}
