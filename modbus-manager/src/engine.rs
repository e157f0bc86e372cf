use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use crate::bus::BusClient;
use crate::codec::Address;
use crate::error::{BusError, WriteError};
use crate::poll::{poll_device, DevicePoll, PollReport};
use crate::register::{AccessClass, Value};
use crate::registry::{Registry, Row};
use crate::write::write_register;

struct Session<B> {
    registry: Registry,
    bus: B,
    cycle: u64,
}

/// Owner of the Registry and the Bus Client.
///
/// All bus traffic goes through one lock: a device poll (select, batched reads,
/// commit) or a write (select, write, commit) runs to completion before the next
/// one starts. Clones share the same lock, registry and bus.
pub struct Engine<B> {
    session: Arc<Mutex<Session<B>>>,
    reports: Arc<watch::Sender<Arc<PollReport>>>,
}

impl<B> Clone for Engine<B> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            reports: Arc::clone(&self.reports),
        }
    }
}

impl<B: BusClient> Engine<B> {
    pub fn new(registry: Registry, bus: B) -> Self {
        let (reports, _) = watch::channel(Arc::new(PollReport::default()));
        Self {
            session: Arc::new(Mutex::new(Session {
                registry,
                bus,
                cycle: 0,
            })),
            reports: Arc::new(reports),
        }
    }

    /// Receive the report of every completed poll cycle.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PollReport>> {
        self.reports.subscribe()
    }

    /// Run one poll cycle over all devices, releasing the bus between devices.
    pub async fn poll_once(&self) -> Arc<PollReport> {
        let (cycle, device_count) = {
            let mut session = self.session.lock().await;
            session.cycle += 1;
            (session.cycle, session.registry.devices().len())
        };

        let mut report = PollReport {
            cycle,
            devices: Vec::with_capacity(device_count),
        };
        for index in 0..device_count {
            let mut session = self.session.lock().await;
            let Session { registry, bus, .. } = &mut *session;
            let device = registry.devices()[index].name().to_string();

            let result = poll_device(bus, registry, index).await;
            match &result {
                Ok(updated) => tracing::debug!(cycle, %device, updated, "Polled device"),
                Err(err) => tracing::warn!(cycle, %device, error = %err, "Poll failed"),
            }
            report.devices.push(DevicePoll { device, result });
        }

        let report = Arc::new(report);
        self.reports.send_replace(Arc::clone(&report));
        report
    }

    /// Write `text` to one register, waiting for any bus call in flight.
    pub async fn write(
        &self,
        device: &str,
        access_class: AccessClass,
        address: Address,
        text: &str,
    ) -> Result<Value, WriteError> {
        let mut session = self.session.lock().await;
        let Session { registry, bus, .. } = &mut *session;
        let result = write_register(bus, registry, device, access_class, address, text).await;
        if let Err(err) = &result {
            tracing::warn!(device, %access_class, address, error = %err, "Write failed");
        }
        result
    }

    /// Snapshot of all registers for presentation.
    pub async fn rows(&self) -> Vec<Row> {
        self.session.lock().await.registry.rows()
    }

    /// Run `f` against the current registry.
    pub async fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.session.lock().await.registry)
    }

    /// Poll every `period` until `shutdown` completes. Late ticks are delayed, not bursted.
    pub async fn run(&self, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
        tracing::debug!("Polling stopped");
    }

    /// Close the bus connection.
    pub async fn shutdown(&self) -> Result<(), BusError> {
        let result = self.session.lock().await.bus.disconnect().await;
        tracing::info!("Bus connection closed");
        result
    }
}
