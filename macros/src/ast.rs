use syn::Expr;

/// `cache!( ... )` after parsing.
pub struct CacheInput {
    pub budget: Expr,
    pub destructor: Expr,
    pub granularity: Option<Expr>,
    pub backoff: Option<BackoffInput>,
    pub metrics: Option<MetricsInput>,
}

/// `backoff: { policy: .., limit: .. }`
pub struct BackoffInput {
    pub policy: Expr,
    pub limit: Expr,
}

/// `metrics: { shards: .., latency_samples: .. }`
pub struct MetricsInput {
    pub shards: Expr,
    pub latency_samples: Expr,
}
