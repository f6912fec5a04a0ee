use crate::ast::{BackoffInput, CacheInput, MetricsInput};
use proc_macro::TokenStream;
use quote::{quote, ToTokens};
use syn::parse_macro_input;

mod ast;
mod parse;

/// Builds a `sigcache::LruCache` from a declarative description.
///
/// ```ignore
/// let cache = cache!(
///     budget: 64 << 20,
///     granularity: 16,
///     destructor: drop,
///     backoff: { policy: BackoffPolicy::Exponential, limit: 64 },
///     metrics: { shards: 8, latency_samples: 512 },
/// );
/// ```
///
/// `budget` and `destructor` are required, the rest fall back to the
/// defaults of `sigcache::CacheConfig`.
#[proc_macro]
pub fn cache(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as CacheInput);

    TokenStream::from(quote! {#input})
}

impl ToTokens for CacheInput {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let budget = &self.budget;
        let destructor = &self.destructor;

        let mut config = quote! { ::sigcache::CacheConfig::new(#budget) };

        if let Some(granularity) = &self.granularity {
            config.extend(quote! { .with_granularity(#granularity) });
        }
        if let Some(backoff) = &self.backoff {
            config.extend(quote! { .with_backoff(#backoff) });
        }
        if let Some(metrics) = &self.metrics {
            config.extend(quote! { .with_metrics(#metrics) });
        }

        tokens.extend(quote! {
            ::sigcache::LruCache::with_config(#config, #destructor)
        });
    }
}

impl ToTokens for BackoffInput {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let policy = &self.policy;
        let limit = &self.limit;

        tokens.extend(quote! {
            ::sigcache::BackoffConfig { policy: #policy, limit: #limit }
        });
    }
}

impl ToTokens for MetricsInput {
    fn to_tokens(&self, tokens: &mut proc_macro2::TokenStream) {
        let shards = &self.shards;
        let latency_samples = &self.latency_samples;

        tokens.extend(quote! {
            ::sigcache::MetricsConfig::new(#shards, #latency_samples)
        });
    }
}
