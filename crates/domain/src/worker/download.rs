use tracing::{debug, warn};

use crate::model::key_prefix;

use super::{record_call, DownloadCompletedInput, DownloadCompletedOutput, SampleWorker};

impl SampleWorker {
    /// Picks the downloaded keys worth keeping on this device: ads that parse
    /// and are not blocked by an installed app, plus templates, examples and
    /// models.
    pub fn on_download_completed(&self, input: &DownloadCompletedInput) -> DownloadCompletedOutput {
        debug!(entries = input.contents.len(), "filtering downloaded contents");
        let mut retained_keys = Vec::new();
        for entry in &input.contents {
            let key = entry.key.as_str();
            if key.starts_with(key_prefix::AD) {
                match self.ads.get_or_parse(key, &entry.data) {
                    Ok(ad) if ad.is_blocked(&input.user_data) => {
                        debug!(key, "dropping ad blocked by an installed app");
                    }
                    Ok(_) => retained_keys.push(entry.key.clone()),
                    Err(err) => warn!(key, error = %err, "dropping unparseable ad"),
                }
            } else if key.starts_with(key_prefix::TEMPLATE)
                || key.starts_with(key_prefix::EXAMPLE)
                || key.starts_with(key_prefix::MODEL)
            {
                retained_keys.push(entry.key.clone());
            }
        }
        record_call("download", "ok");
        DownloadCompletedOutput { retained_keys }
    }
}
