//! Load shedding middleware.

use std::sync::Arc;

use nimbus_core::{BoxFuture, HandlerResult, InvocationContext};
use nimbus_resilience::{InFlightGauge, LoadShedder};

use crate::middleware::{Middleware, Next};

/// Rejects invocations before they consume any resources.
///
/// When given an [`InFlightGauge`], the stage also counts the invocations it
/// admits, so the same gauge can serve as the shedder's load signal.
#[derive(Debug, Clone)]
pub struct LoadShedMiddleware {
    shedder: Arc<LoadShedder>,
    gauge: Option<Arc<InFlightGauge>>,
}

impl LoadShedMiddleware {
    /// Creates the stage.
    #[must_use]
    pub fn new(shedder: LoadShedder) -> Self {
        Self {
            shedder: Arc::new(shedder),
            gauge: None,
        }
    }

    /// Tracks admitted invocations in `gauge`.
    #[must_use]
    pub fn with_gauge(mut self, gauge: Arc<InFlightGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Returns the shedder.
    #[must_use]
    pub fn shedder(&self) -> &LoadShedder {
        &self.shedder
    }
}

impl Middleware for LoadShedMiddleware {
    fn name(&self) -> &'static str {
        "load_shed"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut InvocationContext,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.shedder.check(ctx)?;
            let _in_flight = self.gauge.as_deref().map(InFlightGauge::enter);
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::stages::test_support::ctx;
    use nimbus_core::{handler_fn, NimbusError, Response};
    use nimbus_resilience::{LoadSignal, ManualLoad};
    use std::time::Duration;

    #[tokio::test]
    async fn test_percentage_sheds_half() {
        let pipeline = Pipeline::builder()
            .use_middleware(LoadShedMiddleware::new(LoadShedder::percentage(0.5)))
            .build();
        let handler = handler_fn(|_ctx| Box::pin(async { Ok(Response::ok()) }));

        let mut shed = 0;
        for _ in 0..10 {
            let mut ctx = ctx(Duration::from_secs(1));
            if let Err(err) = pipeline.run(&mut ctx, &handler).await {
                assert!(matches!(err, NimbusError::LoadShed { .. }));
                shed += 1;
            }
        }
        assert_eq!(shed, 5);
    }

    #[tokio::test]
    async fn test_priority_mode_follows_signal() {
        let load = Arc::new(ManualLoad::new(0.2));
        let pipeline = Pipeline::builder()
            .use_middleware(LoadShedMiddleware::new(LoadShedder::priority(
                5,
                0.8,
                Arc::clone(&load) as Arc<dyn LoadSignal>,
            )))
            .build();
        let handler = handler_fn(|_ctx| Box::pin(async { Ok(Response::ok()) }));

        let mut calm = ctx(Duration::from_secs(1));
        assert!(pipeline.run(&mut calm, &handler).await.is_ok());

        load.set(0.9);
        let mut busy = ctx(Duration::from_secs(1));
        assert!(pipeline.run(&mut busy, &handler).await.is_err());
    }

    #[tokio::test]
    async fn test_gauge_counts_in_flight() {
        let gauge = Arc::new(InFlightGauge::new(10));
        let observed = Arc::clone(&gauge);
        let pipeline = Pipeline::builder()
            .use_middleware(
                LoadShedMiddleware::new(LoadShedder::percentage(0.0)).with_gauge(Arc::clone(&gauge)),
            )
            .build();
        let handler = handler_fn(move |_ctx| {
            let current = observed.current();
            Box::pin(async move { Ok(Response::ok().with_header("x-in-flight", current.to_string())) })
        });

        let mut ctx = ctx(Duration::from_secs(1));
        let response = pipeline.run(&mut ctx, &handler).await.unwrap();
        assert_eq!(response.headers().get("x-in-flight"), Some("1"));
        assert_eq!(gauge.current(), 0);
    }
}
