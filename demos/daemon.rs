//! # Example: daemon
//!
//! A toy resource-balancing daemon: a simulated pool, a linear controller
//! adjusting the pool's demand, and a blocking sensor sampling it.
//!
//! Demonstrates how to:
//! - Register a [`Service`] (cooperative) and a [`BlockingService`].
//! - Submit ad-hoc work with [`ServiceRunner::adopt`] and [`ServiceRunner::execute`].
//! - Stop the daemon with [`ServiceRunner::shutdown`] (or Ctrl-C).
//!
//! ## Flow
//! ```text
//! main ──► register(Controller, Native), register_blocking(Sensor, Thread)
//!      ──► adopt(announce, Isolated)
//!      ──► accept()
//!            ├─► reaper adopts Controller and Sensor
//!            ├─► stopper thread: execute(snapshot) ─► shutdown()
//!            └─► returns Ok(())
//! ```
//!
//! ## Run
//! ```bash
//! RUNVISOR_LOG=debug cargo run --example daemon
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use runvisor::{
    BlockingService, Call, Config, Flavour, Payload, Service, ServiceRegistry, ServiceRunner,
};
use tokio_util::sync::CancellationToken;

/// Simulated resource pool.
#[derive(Debug, Default)]
struct Pool {
    demand: f64,
    supply: f64,
}

impl Pool {
    /// Fraction of the supply that is in use.
    fn utilisation(&self) -> f64 {
        if self.supply == 0.0 {
            0.0
        } else {
            (self.supply * 0.8).min(self.demand) / self.supply
        }
    }
}

/// Raises demand while utilisation is high, lowers it when low.
struct Controller {
    pool: Arc<Mutex<Pool>>,
    rate: f64,
}

#[async_trait]
impl Service for Controller {
    async fn run(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    let mut pool = self.pool.lock();
                    let util = pool.utilisation();
                    let delta = if util > 0.9 {
                        self.rate
                    } else if util < 0.5 {
                        -self.rate
                    } else {
                        0.0
                    };
                    pool.demand = (pool.demand + delta).max(0.0);
                    tracing::info!(demand = pool.demand, utilisation = util, "adjusted demand");
                }
            }
        }
    }
}

/// Grows the pool's supply towards its demand, one step per sample.
struct Sensor {
    pool: Arc<Mutex<Pool>>,
}

impl BlockingService for Sensor {
    fn run(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        while !ctx.is_cancelled() {
            {
                let mut pool = self.pool.lock();
                if pool.supply < pool.demand {
                    pool.supply += 1.0;
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    runvisor::logging::init_logging(None)?;

    let pool = Arc::new(Mutex::new(Pool {
        demand: 4.0,
        supply: 2.0,
    }));
    let controller = Arc::new(Controller {
        pool: pool.clone(),
        rate: 1.0,
    });
    let sensor = Arc::new(Sensor { pool: pool.clone() });

    let registry = ServiceRegistry::global();
    registry.register(&controller, Flavour::Native)?;
    registry.register_blocking(&sensor, Flavour::Thread)?;

    let cfg = Config::default().with_accept_delay(Duration::from_millis(500));
    let runner = ServiceRunner::new(cfg);
    runner.adopt(
        Payload::task("announce", |_ctx| async {
            tracing::info!("balancer online");
            Ok(())
        }),
        Flavour::Isolated,
    )?;

    let stopper = runner.clone();
    let snapshot_pool = pool.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(3));
        let snapshot = stopper.execute(
            Call::blocking("snapshot", move |_ctx| {
                let pool = snapshot_pool.lock();
                Ok((pool.demand, pool.supply))
            }),
            Flavour::Thread,
        );
        tracing::info!(?snapshot, "final pool state");
        stopper.shutdown();
    });

    runner.accept()?;
    Ok(())
}
