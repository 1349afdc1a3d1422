use crate::boundary::{ComponentBoundary, FatalSink};
use crate::clock::{Clock, TokioClock};
use crate::config::ResilienceConfig;
use crate::dispatcher::{ErrorDispatcher, LogNotifier, Notifier};
use crate::recovery::{FileSystemRecoverer, ParsingRecoverer, ProviderRecoverer};
use log::info;
use std::sync::Arc;

/// Owned registry that wires the dispatcher, the category recoverers and the
/// component boundary together
///
/// Collaborators receive references to the pieces they need from here instead
/// of reaching for shared global state.
pub struct ResilienceFramework {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    dispatcher: ErrorDispatcher,
    filesystem: Arc<FileSystemRecoverer>,
    parsing: Arc<ParsingRecoverer>,
    provider: Arc<ProviderRecoverer>,
    boundary: ComponentBoundary,
    fatal_sink: FatalSink,
}

impl ResilienceFramework {
    pub fn new(config: ResilienceConfig, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        let dispatcher = ErrorDispatcher::new(config.dispatcher.clone(), clock.clone(), notifier);

        let filesystem = Arc::new(
            FileSystemRecoverer::new(config.filesystem.clone()).with_dispatcher(&dispatcher),
        );
        let parsing =
            Arc::new(ParsingRecoverer::new(config.parsing.clone()).with_dispatcher(&dispatcher));
        let provider =
            Arc::new(ProviderRecoverer::new(config.provider.clone()).with_dispatcher(&dispatcher));
        filesystem.register(&dispatcher);
        parsing.register(&dispatcher);
        provider.register(&dispatcher);

        let boundary = ComponentBoundary::new(config.boundary.clone(), clock.clone(), dispatcher.clone());
        let fatal_sink = boundary.fatal_sink();

        info!("Resilience framework initialized");
        Self {
            config,
            clock,
            dispatcher,
            filesystem,
            parsing,
            provider,
            boundary,
            fatal_sink,
        }
    }

    /// Framework on the tokio clock, delivering notifications to the log
    pub fn with_config(config: ResilienceConfig) -> Self {
        Self::new(config, Arc::new(TokioClock::new()), Arc::new(LogNotifier))
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ErrorDispatcher {
        &self.dispatcher
    }

    pub fn filesystem(&self) -> &Arc<FileSystemRecoverer> {
        &self.filesystem
    }

    pub fn parsing(&self) -> &Arc<ParsingRecoverer> {
        &self.parsing
    }

    pub fn provider(&self) -> &Arc<ProviderRecoverer> {
        &self.provider
    }

    pub fn boundary(&self) -> &ComponentBoundary {
        &self.boundary
    }

    pub fn fatal_sink(&self) -> &FatalSink {
        &self.fatal_sink
    }

    /// Clear every timer and registry; nothing fires or retries afterwards
    pub fn dispose(&self) {
        self.boundary.dispose();
        self.dispatcher.dispose();
        self.filesystem.retry_tracker().clear();
        self.parsing.clear();
        self.provider.clear();
        self.clock.cancel_all();
        info!("Resilience framework disposed");
    }
}
