mod rate_limit;

pub use rate_limit::{CallerIdentity, RateLimitState, RoutePolicy, rate_limit, request_identity};
