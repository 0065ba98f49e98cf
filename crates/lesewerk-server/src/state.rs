// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared router state.

use std::sync::Arc;
use std::time::Instant;

use crate::services::app_services::AppServices;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: AppServices,
    started_at: Instant,
}

impl AppState {
    pub fn new(services: AppServices) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                services,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.inner.services
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
