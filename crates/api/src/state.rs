use odp_domain::event_url::EventTokenSigner;
use odp_domain::services::telemetry::TelemetryGuard;
use odp_domain::worker::SampleWorker;
use odp_storage::SeaOrmStorage;

#[derive(Clone)]
pub struct AppState {
    storage: SeaOrmStorage,
    worker: SampleWorker,
    signer: EventTokenSigner,
    telemetry: TelemetryGuard,
}

impl AppState {
    pub fn new(
        storage: SeaOrmStorage,
        worker: SampleWorker,
        signer: EventTokenSigner,
        telemetry: TelemetryGuard,
    ) -> Self {
        Self {
            storage,
            worker,
            signer,
            telemetry,
        }
    }

    /// State whose worker reads through `storage` and links events under
    /// `public_url`. The same signer verifies those links when they come back.
    pub fn with_storage(
        storage: SeaOrmStorage,
        public_url: &str,
        signer: EventTokenSigner,
        telemetry: TelemetryGuard,
    ) -> Self {
        let worker = storage.sample_worker(public_url, signer.clone());
        Self::new(storage, worker, signer, telemetry)
    }

    pub fn storage(&self) -> &SeaOrmStorage {
        &self.storage
    }

    pub fn worker(&self) -> &SampleWorker {
        &self.worker
    }

    pub fn event_signer(&self) -> &EventTokenSigner {
        &self.signer
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }
}
