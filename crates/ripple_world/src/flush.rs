//! The flush engine.
//!
//! A flush drains the mutation log in waves until it stays empty:
//!
//! 1. Take the whole log as the current [`Wave`]; the log starts over empty.
//! 2. Every system, in registration order, computes its dispatches for the
//!    wave against the store as it is *now*.
//! 3. Each non-empty dispatch invokes its handler exactly once.
//! 4. Whatever the handlers write lands in the fresh log and is seen by the
//!    next wave, never the current one.
//!
//! A flush gives up with [`WorldError::UnboundedFlush`] once it has run
//! `max_flush_waves` waves and the log is still not empty. A failing handler
//! stops the flush on the spot; nothing is rolled back.

use std::cell::Cell;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use crate::error::WorldError;
use crate::inspect;
use crate::matcher::Wave;
use crate::profiler::FlushRecorder;
use crate::system::RegisteredSystem;
use crate::world::World;

/// Name reported by [`WorldError::UnboundedFlush`] when no system wrote
/// anything during the flush.
const EXTERNAL_PRODUCER: &str = "<external caller>";

struct FlushingGuard<'a>(&'a Cell<bool>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl World {
    /// Run one flush to its fixpoint. Re-entrant calls are absorbed.
    pub(crate) fn run_flush(&self) -> Result<(), WorldError> {
        let inner = &self.inner;
        if inner.flushing.replace(true) {
            trace!("flush already running; absorbed");
            return Ok(());
        }
        let _guard = FlushingGuard(&inner.flushing);
        if inner.state.borrow().log.is_empty() {
            return Ok(());
        }

        let mut recorder = inner.profiler.borrow_mut().begin();
        let result = self.drain_waves(recorder.as_mut());
        if let Some(recorder) = recorder {
            inner.profiler.borrow_mut().finish(recorder);
        }
        result
    }

    fn drain_waves(&self, mut recorder: Option<&mut FlushRecorder>) -> Result<(), WorldError> {
        let max_waves = self.inner.config.max_flush_waves;
        let mut waves = 0;
        let mut last_producer: Option<String> = None;

        loop {
            let mutations = {
                let mut state = self.inner.state.borrow_mut();
                if state.log.is_empty() {
                    break;
                }
                if waves >= max_waves {
                    let last_system =
                        last_producer.unwrap_or_else(|| EXTERNAL_PRODUCER.to_string());
                    error!(
                        waves,
                        last_system = %last_system,
                        pending = state.log.len(),
                        "flush did not settle"
                    );
                    return Err(WorldError::UnboundedFlush { waves, last_system });
                }
                state.log.drain()
            };

            let wave = Wave::new(waves, mutations);
            debug!(
                wave = wave.number,
                mutations = wave.len(),
                entities = wave.entities().len(),
                "processing wave"
            );
            if let Some(recorder) = recorder.as_deref_mut() {
                recorder.wave(wave.len());
            }

            let systems = self.inner.systems.borrow().snapshot();
            for system in &systems {
                let started = recorder.is_some().then(Instant::now);
                let before = self.inner.state.borrow().log.len();

                let dispatched = self.run_system(system, &wave)?;

                if self.inner.state.borrow().log.len() > before {
                    last_producer = Some(system.name.clone());
                }
                if dispatched > 0
                    && let (Some(recorder), Some(started)) = (recorder.as_deref_mut(), started)
                {
                    recorder.system(&system.name, wave.number, started.elapsed(), dispatched);
                }
            }
            waves += 1;
        }

        if waves > 0 {
            debug!(waves, "flush settled");
        }
        Ok(())
    }

    /// Evaluate one system against `wave` and invoke its handlers. Returns
    /// the number of entities handed to handlers.
    fn run_system(&self, system: &RegisteredSystem, wave: &Wave) -> Result<usize, WorldError> {
        let dispatches = {
            let state = self.inner.state.borrow();
            system.matcher.evaluate(wave, &state.store)
        };

        let mut dispatched = 0;
        for dispatch in dispatches {
            let Some(handler) = system.handler(dispatch.phase) else {
                continue;
            };
            trace!(
                system = %system.name,
                phase = %dispatch.phase,
                entities = dispatch.entities.len(),
                "dispatching"
            );
            dispatched += dispatch.entities.len();

            if let Err(err) = handler(self, &dispatch.entities) {
                let report = inspect::report(&self.inner.state.borrow().store, &dispatch.entities);
                warn!(system = %system.name, phase = %dispatch.phase, error = %err, "system failed");
                return Err(WorldError::SystemExecution {
                    system: system.name.clone(),
                    phase: dispatch.phase,
                    entities: dispatch.entities,
                    report,
                    source: WorldError::shared_source(err),
                });
            }
        }
        Ok(dispatched)
    }
}
