//! Process-global creation limiter consulted by the CLI backend.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// A single-process resource limiter: bounds concurrent container creations
/// and paces the ones that do run.
///
/// `acquire` blocks while `active >= max_concurrent`, sleeping
/// `creation_delay` between probes; `release` decrements, floored at zero.
/// No fairness beyond arrival-order starvation-freedom is promised.
pub struct Coordinator {
    state: Mutex<usize>,
    max_concurrent: usize,
    creation_delay: Duration,
}

impl Coordinator {
    pub fn new(max_concurrent: usize, creation_delay: Duration) -> Self {
        Self {
            state: Mutex::new(0),
            max_concurrent: max_concurrent.max(1),
            creation_delay,
        }
    }

    pub async fn acquire(&self) {
        loop {
            {
                let mut active = self.state.lock().unwrap();
                if *active < self.max_concurrent {
                    *active += 1;
                    return;
                }
            }
            tokio::time::sleep(self.creation_delay).await;
        }
    }

    pub fn release(&self) {
        let mut active = self.state.lock().unwrap();
        *active = active.saturating_sub(1);
    }

    pub fn active(&self) -> usize {
        *self.state.lock().unwrap()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

static COORDINATOR: OnceLock<Coordinator> = OnceLock::new();

/// Install process-wide coordinator parameters. Must be called, if at all,
/// before the first container creation; later calls are ignored.
pub fn init(max_concurrent: usize, creation_delay: Duration) {
    let _ = COORDINATOR.set(Coordinator::new(max_concurrent, creation_delay));
}

/// The process-global coordinator, created with default parameters on
/// first use if [`init`] was never called.
pub fn global() -> &'static Coordinator {
    COORDINATOR.get_or_init(|| Coordinator::new(32, Duration::from_millis(50)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn never_exceeds_max_concurrent() {
        let coordinator = Arc::new(Coordinator::new(3, Duration::from_millis(5)));
        let mut handles = Vec::new();
        let observed_max = Arc::new(Mutex::new(0usize));

        for _ in 0..10 {
            let coordinator = coordinator.clone();
            let observed_max = observed_max.clone();
            handles.push(tokio::spawn(async move {
                coordinator.acquire().await;
                {
                    let mut m = observed_max.lock().unwrap();
                    *m = (*m).max(coordinator.active());
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                coordinator.release();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(*observed_max.lock().unwrap() <= 3);
        assert_eq!(coordinator.active(), 0);
    }

    #[test]
    fn release_never_underflows() {
        let coordinator = Coordinator::new(2, Duration::from_millis(1));
        coordinator.release();
        assert_eq!(coordinator.active(), 0);
    }
}
