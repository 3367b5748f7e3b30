use std::collections::BTreeMap;

use handlebars::Handlebars;
use tracing::debug;

use crate::event_url::EventParams;
use crate::model::EventType;

use super::{record_call, ErrorCode, RenderInput, RenderOutput, SampleWorker, StepError, WorkerError};

pub const IMPRESSION_URL_PARAM: &str = "impressionUrl";
pub const CLICK_URL_PARAM: &str = "clickUrl";
pub const AD_TEXT_PARAM: &str = "adText";

impl SampleWorker {
    /// Renders the ad named by the first rendering key of a query, with
    /// tracking links for its impression and click.
    pub async fn on_render(&self, input: &RenderInput) -> Result<RenderOutput, WorkerError> {
        let result = self
            .render(input)
            .await
            .map_err(|err| err.into_worker_error(ErrorCode::OnRender, "render"));
        record_call("render", if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn render(&self, input: &RenderInput) -> Result<RenderOutput, StepError> {
        let key = input
            .rendering_keys
            .first()
            .ok_or(StepError::NoRenderingKey)?;
        let impression = EventParams {
            event_type: EventType::Impression.code(),
        };

        let (data, impression_url) = tokio::try_join!(
            async {
                self.ports
                    .remote_data
                    .get(key)
                    .await
                    .map_err(StepError::from)
            },
            async {
                self.ports
                    .event_urls
                    .pixel_url(input.query_id, impression)
                    .await
                    .map_err(StepError::from)
            },
        )?;
        let data = data.ok_or_else(|| StepError::MissingKey(key.clone()))?;
        let ad = self.ads.get_or_parse(key, &data)?;

        let click = EventParams {
            event_type: EventType::Click.code(),
        };
        let click_url = self
            .ports
            .event_urls
            .url_with_redirect(input.query_id, click, &ad.landing_page)
            .await?;

        let Some(template_id) = ad.template_id.as_deref() else {
            debug!(ad_id = %ad.id, "rendering inline html");
            return Ok(RenderOutput {
                content: Some(format!(
                    "<img src=\"{impression_url}\" alt=\"\">\n<a href=\"{click_url}\">{}</a>",
                    ad.text
                )),
                ..RenderOutput::default()
            });
        };

        let template_params = BTreeMap::from([
            (IMPRESSION_URL_PARAM.to_string(), impression_url),
            (CLICK_URL_PARAM.to_string(), click_url),
            (AD_TEXT_PARAM.to_string(), ad.text.clone()),
        ]);
        let content = match self.ports.remote_data.get(template_id).await? {
            Some(template) => Some(render_template(template_id, &template, &template_params)?),
            None => {
                debug!(template_id, "template not downloaded, returning params only");
                None
            }
        };
        Ok(RenderOutput {
            content,
            template_id: Some(template_id.to_string()),
            template_params,
        })
    }
}

fn render_template(
    id: &str,
    template: &[u8],
    params: &BTreeMap<String, String>,
) -> Result<String, StepError> {
    let failed = |reason: String| StepError::Template {
        id: id.to_string(),
        reason,
    };
    let source = std::str::from_utf8(template).map_err(|err| failed(err.to_string()))?;
    Handlebars::new()
        .render_template(source, params)
        .map_err(|err| failed(err.to_string()))
}
