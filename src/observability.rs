use biometrics::{Collector, Counter, Moments};

pub(crate) static QUERIES: Counter = Counter::new("nl2sh.session.queries");
pub(crate) static DIRECTIVES: Counter = Counter::new("nl2sh.session.directives");
pub(crate) static EVICTIONS: Counter = Counter::new("nl2sh.context.evictions");

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("nl2sh.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("nl2sh.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("nl2sh.client.request_duration_seconds");

pub(crate) static MODERATION_FLAGS: Counter = Counter::new("nl2sh.moderation.flags");
pub(crate) static MODERATION_ERRORS: Counter = Counter::new("nl2sh.moderation.errors");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("nl2sh.stream.chunks");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("nl2sh.stream.errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&QUERIES);
    collector.register_counter(&DIRECTIVES);
    collector.register_counter(&EVICTIONS);

    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&MODERATION_FLAGS);
    collector.register_counter(&MODERATION_ERRORS);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_ERRORS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all() {
        let collector = Collector::new();
        register_biometrics(collector);
        QUERIES.click();
        CLIENT_REQUEST_DURATION.add(0.25);
    }
}
