use tracing::trace;

// Trace-level counters; the Prometheus recorder installed in main renders `/metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "autolist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "autolist.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn tier_used(tier: &'static str) {
    trace!(target = "autolist.metrics", tier = tier, "resolution_tier_used");
}
