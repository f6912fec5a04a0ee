use crate::ast::{BackoffInput, CacheInput, MetricsInput};
use proc_macro2::{Ident, Span};
use syn::parse::{Parse, ParseStream};
use syn::token::Brace;
use syn::{braced, Error, Expr, Token};

/// Walks `key: value` pairs separated by optional commas. `field` receives
/// each key and must consume exactly its value.
fn parse_fields<F>(input: ParseStream, mut field: F) -> syn::Result<()>
where
    F: FnMut(&Ident, ParseStream) -> syn::Result<()>,
{
    while !input.is_empty() {
        let key = input.parse::<Ident>()?;
        input.parse::<Token![:]>()?;

        field(&key, input)?;

        if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
        }
    }

    Ok(())
}

fn set_once<T>(slot: &mut Option<T>, key: &Ident, value: T) -> syn::Result<()> {
    if slot.is_some() {
        return Err(Error::new(key.span(), format!("duplicate '{key}' field")));
    }

    *slot = Some(value);
    Ok(())
}

fn required<T>(slot: Option<T>, span: Span, name: &str) -> syn::Result<T> {
    slot.ok_or_else(|| Error::new(span, format!("field '{name}' is missing")))
}

fn unknown(key: &Ident, within: &str) -> Error {
    Error::new(
        key.span(),
        format!("field '{key}' is not recognized in {within}"),
    )
}

impl Parse for CacheInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut budget = None;
        let mut destructor = None;
        let mut granularity = None;
        let mut backoff = None;
        let mut metrics = None;

        parse_fields(input, |key, value| match key.to_string().as_str() {
            "budget" => set_once(&mut budget, key, value.parse::<Expr>()?),
            "destructor" => set_once(&mut destructor, key, value.parse::<Expr>()?),
            "granularity" => set_once(&mut granularity, key, value.parse::<Expr>()?),
            "backoff" => set_once(&mut backoff, key, value.parse::<BackoffInput>()?),
            "metrics" => set_once(&mut metrics, key, value.parse::<MetricsInput>()?),
            _ => Err(unknown(key, "cache")),
        })?;

        Ok(CacheInput {
            budget: required(budget, input.span(), "budget")?,
            destructor: required(destructor, input.span(), "destructor")?,
            granularity,
            backoff,
            metrics,
        })
    }
}

impl Parse for BackoffInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if !input.peek(Brace) {
            return Err(input.error("backoff expects a braced block"));
        }

        let content;
        braced!(content in input);

        let mut policy = None;
        let mut limit = None;

        parse_fields(&content, |key, value| match key.to_string().as_str() {
            "policy" => set_once(&mut policy, key, value.parse::<Expr>()?),
            "limit" => set_once(&mut limit, key, value.parse::<Expr>()?),
            _ => Err(unknown(key, "backoff")),
        })?;

        Ok(BackoffInput {
            policy: required(policy, content.span(), "policy")?,
            limit: required(limit, content.span(), "limit")?,
        })
    }
}

impl Parse for MetricsInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if !input.peek(Brace) {
            return Err(input.error("metrics expects a braced block"));
        }

        let content;
        braced!(content in input);

        let mut shards = None;
        let mut latency_samples = None;

        parse_fields(&content, |key, value| match key.to_string().as_str() {
            "shards" => set_once(&mut shards, key, value.parse::<Expr>()?),
            "latency_samples" => set_once(&mut latency_samples, key, value.parse::<Expr>()?),
            _ => Err(unknown(key, "metrics")),
        })?;

        Ok(MetricsInput {
            shards: required(shards, content.span(), "shards")?,
            latency_samples: required(latency_samples, content.span(), "latency_samples")?,
        })
    }
}
