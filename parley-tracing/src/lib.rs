//! `#[traced]` emits enter/exit events around a function body, optionally
//! wrapping it in a `tracing` span and reporting how long it ran.
//!
//! ```ignore
//! #[traced(instrument(skip(self), fields(list = %list)), timing(precision = "ms"))]
//! async fn route(&self, list: &str) -> Result<(), QueueError> { .. }
//! ```

extern crate proc_macro;

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{ItemFn, Stmt, parse::Parse, parse_macro_input, parse_quote};

#[derive(PartialEq, Eq, Clone, Copy, Default)]
enum Precision {
    #[default]
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Precision {
    fn parse_unit(lit: &syn::LitStr) -> syn::Result<Self> {
        match lit.value().as_str() {
            "ns" | "nanos" | "nanoseconds" => Ok(Self::Nanos),
            "us" | "micros" | "microseconds" => Ok(Self::Micros),
            "ms" | "millis" | "milliseconds" => Ok(Self::Millis),
            "s" | "secs" | "seconds" => Ok(Self::Seconds),
            other => Err(syn::Error::new(
                lit.span(),
                format!("unknown precision `{other}`, expected one of ns, us, ms, s"),
            )),
        }
    }

    /// Expression rendering `elapsed: Duration` in this unit.
    fn render(self) -> syn::Expr {
        match self {
            Self::Nanos => parse_quote!(format!("{} ns", elapsed.as_nanos())),
            Self::Micros => parse_quote!(format!("{} us", elapsed.as_micros())),
            Self::Millis => parse_quote!(format!("{} ms", elapsed.as_millis())),
            Self::Seconds => parse_quote!(format!("{:.3} s", elapsed.as_secs_f64())),
        }
    }
}

impl Parse for Precision {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if !input.peek(syn::token::Paren) {
            return Ok(Self::default());
        }

        let content;
        let _ = syn::parenthesized!(content in input);
        let _ = content.parse::<keywords::precision>()?;
        let _ = content.parse::<syn::Token![=]>()?;
        Self::parse_unit(&content.parse::<syn::LitStr>()?)
    }
}

mod keywords {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
    syn::custom_keyword!(level);
}

struct Attributes {
    timing: Option<Precision>,
    instrument: Option<TokenStream>,
    level: syn::Ident,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            timing: None,
            instrument: None,
            level: syn::Ident::new("trace", Span::call_site()),
        }
    }
}

impl Parse for Attributes {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut attributes = Self::default();
        let mut level_seen = false;

        while !input.is_empty() {
            let lookahead = input.lookahead1();
            if lookahead.peek(keywords::timing) {
                if attributes.timing.is_some() {
                    return Err(input.error("expected only a single `timing` argument"));
                }
                let _ = input.parse::<keywords::timing>()?;
                attributes.timing = Some(input.parse()?);
            } else if lookahead.peek(keywords::instrument) {
                if attributes.instrument.is_some() {
                    return Err(input.error("expected only a single `instrument` argument"));
                }
                let _ = input.parse::<keywords::instrument>()?;
                if input.peek(syn::token::Paren) {
                    let content;
                    let _ = syn::parenthesized!(content in input);
                    attributes.instrument = Some(content.parse()?);
                } else {
                    attributes.instrument = Some(TokenStream::new());
                }
            } else if lookahead.peek(keywords::level) {
                if level_seen {
                    return Err(input.error("expected only a single `level` argument"));
                }
                let _ = input.parse::<keywords::level>()?;
                let _ = input.parse::<syn::Token![=]>()?;
                let lit = input.parse::<syn::LitStr>()?;
                let name = lit.value().to_ascii_lowercase();
                if !matches!(name.as_str(), "trace" | "debug" | "info") {
                    return Err(syn::Error::new(
                        lit.span(),
                        "level must be one of trace, debug, info",
                    ));
                }
                attributes.level = syn::Ident::new(&name, lit.span());
                level_seen = true;
            } else if lookahead.peek(syn::Token![,]) {
                let _ = input.parse::<syn::Token![,]>()?;
            } else {
                return Err(lookahead.error());
            }
        }

        Ok(attributes)
    }
}

/// Adds enter and exit events (at `trace` unless `level = ".."` says
/// otherwise) to the attributed function.
///
/// `instrument(..)` forwards its arguments to `tracing::instrument`, and
/// `timing(precision = "ms")` appends the elapsed time to the exit event.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as Attributes);
    let mut item_fn = parse_macro_input!(item as ItemFn);

    item_fn
        .attrs
        .push(parse_quote!(#[allow(clippy::items_after_statements)]));

    if let Some(fields) = &args.instrument {
        item_fn
            .attrs
            .push(parse_quote!(#[tracing::instrument(#fields)]));
    }

    let id = item_fn.sig.ident.to_string();
    let level = &args.level;
    let on_exit: Stmt = match args.timing {
        Some(precision) => {
            let render = precision.render();
            parse_quote! {
                {
                    let elapsed = self.started.elapsed();
                    let elapsed = #render;
                    tracing::#level!(function = #id, elapsed = %elapsed, "OnExit");
                }
            }
        }
        None => parse_quote! { tracing::#level!(function = #id, "OnExit"); },
    };

    let guard: Vec<Stmt> = parse_quote! {
        struct __TracedGuard {
            started: std::time::Instant,
        }

        impl __TracedGuard {
            fn enter() -> Self {
                tracing::#level!(function = #id, "OnEnter");
                Self {
                    started: std::time::Instant::now(),
                }
            }
        }

        impl std::ops::Drop for __TracedGuard {
            fn drop(&mut self) {
                #on_exit
            }
        }

        let __traced_guard = __TracedGuard::enter();
    };

    for stmt in guard.into_iter().rev() {
        item_fn.block.stmts.insert(0, stmt);
    }

    proc_macro::TokenStream::from(quote! { #item_fn })
}
