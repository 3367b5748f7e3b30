use std::collections::HashMap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, warn};

use crate::training::{
    criteo_example, mnist_example, synthetic_example, Example, TrainingExampleRecord,
    MNIST_PIXELS,
};

use super::{record_call, SampleWorker, StepError, TrainingExamplesInput, TrainingExamplesOutput};

const CRITEO_MAX_EXAMPLES: usize = 10;
const CRITEO_KEY_RANGE: u32 = 100;
const KERAS_MAX_EXAMPLES: usize = 400;
const MNIST_MAX_KEY: usize = 300;

impl SampleWorker {
    /// Produces federated-training examples for a population. The population
    /// name picks the generator: `criteo`, `keras` or `mnist`. Anything else
    /// yields no examples.
    pub async fn on_training_examples(
        &self,
        input: &TrainingExamplesInput,
    ) -> TrainingExamplesOutput {
        let mut rng = StdRng::from_entropy();
        self.training_examples_with(input, &mut rng).await
    }

    async fn training_examples_with<R: Rng + Send>(
        &self,
        input: &TrainingExamplesInput,
        rng: &mut R,
    ) -> TrainingExamplesOutput {
        let population = input.population_name.as_str();
        let records = if population.contains("criteo") {
            self.criteo_records(rng).await
        } else if population.contains("keras") {
            keras_records(rng)
        } else if population.contains("mnist") {
            self.mnist_records().await
        } else {
            debug!(population, "unknown population, no examples");
            Vec::new()
        };
        debug!(population, examples = records.len(), "training examples generated");
        record_call("training_examples", "ok");
        TrainingExamplesOutput { records }
    }

    /// 1 to 10 examples drawn at random from `example1..example100`.
    async fn criteo_records<R: Rng + Send>(&self, rng: &mut R) -> Vec<TrainingExampleRecord> {
        let wanted = rng.gen_range(1..=CRITEO_MAX_EXAMPLES);
        let mut rows: HashMap<u32, String> = HashMap::new();
        let mut records = Vec::with_capacity(wanted);
        for index in 0..wanted {
            let key = rng.gen_range(1..=CRITEO_KEY_RANGE);
            let row = match rows.get(&key) {
                Some(row) => row.clone(),
                None => match self.example_row(&format!("example{key}")).await {
                    Ok(row) => {
                        rows.insert(key, row.clone());
                        row
                    }
                    Err(err) => {
                        warn!(key, error = %err, "failure getting example from remote data");
                        continue;
                    }
                },
            };
            match criteo_example(&row) {
                Ok(example) => records.push(TrainingExampleRecord::new(&example, index)),
                Err(err) => warn!(key, error = %err, "skipping malformed criteo row"),
            }
        }
        records
    }

    /// Reads `example1`, `example2`, ... until the first missing or malformed
    /// row.
    async fn mnist_records(&self) -> Vec<TrainingExampleRecord> {
        let mut records = Vec::new();
        for index in 1..MNIST_MAX_KEY {
            let example = match self.example_row(&format!("example{index}")).await {
                Ok(row) => mnist_example(&row).map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match example {
                Ok(example) => records.push(TrainingExampleRecord::new(&example, index)),
                Err(reason) => {
                    debug!(index, reason = %reason, "mnist examples exhausted");
                    break;
                }
            }
        }
        records
    }

    async fn example_row(&self, key: &str) -> Result<String, StepError> {
        let data = self
            .ports
            .remote_data
            .get(key)
            .await?
            .ok_or_else(|| StepError::MissingKey(key.to_string()))?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

/// Up to 399 synthetic examples of random pixels with a random 0/1 label.
fn keras_records<R: Rng>(rng: &mut R) -> Vec<TrainingExampleRecord> {
    let wanted = rng.gen_range(0..KERAS_MAX_EXAMPLES);
    (0..wanted)
        .map(|index| {
            let pixels: Vec<f32> = (0..MNIST_PIXELS).map(|_| rng.gen::<f32>()).collect();
            let example: Example = synthetic_example(pixels, rng.gen_range(0..2));
            TrainingExampleRecord::new(&example, index)
        })
        .collect()
}
