//! Proc macros for operator-harness
//!
//! Provides the `#[operator_harness::test]` attribute macro for operator
//! integration tests.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, Pat, PatType, ReturnType, Type};

/// Attribute macro for operator integration tests.
///
/// Runs the test as a single-test suite: a session is set up from the
/// `OPERATOR_TEST_*` environment, the test receives a `TestContext` as `ctx`,
/// managed resources are cleaned up afterwards and the session is torn down.
/// Failed tests print diagnostics before the test panics. When teardown
/// fails as well, the test failure is reported first.
///
/// # Example
///
/// ```ignore
/// use operator_harness::TestContext;
///
/// #[operator_harness::test]
/// async fn creates_statefulset(ctx: TestContext) {
///     let kc = ctx.test_keycloak(true).unwrap();
///     ctx.keycloaks().create(&Default::default(), &kc).await.unwrap();
/// }
/// ```
///
/// # With Result Return Type
///
/// The error type must convert into `operator_harness::BoxError`.
///
/// ```ignore
/// #[operator_harness::test]
/// async fn with_result(ctx: TestContext) -> Result<(), kube::Error> {
///     ctx.keycloaks().list(&Default::default()).await?;
///     Ok(())
/// }
/// ```
///
/// # Embedded Reconcilers
///
/// In local mode the operator runs the reconcilers of a registry returned by
/// a function:
///
/// ```ignore
/// fn reconcilers() -> ReconcilerRegistry {
///     ReconcilerRegistry::new().with("keycloak", || Box::new(KeycloakReconciler::default()))
/// }
///
/// #[operator_harness::test(registry = reconcilers)]
/// async fn reconciles(ctx: TestContext) { /* ... */ }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut registry: Option<syn::Path> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("registry") {
            registry = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported attribute, expected `registry = <fn>`"))
        }
    });
    syn::parse_macro_input!(attr with parser);

    let input_fn = syn::parse_macro_input!(item as ItemFn);
    test_impl(&input_fn, registry.as_ref()).into()
}

/// Type of the parameter named "ctx", if any
fn ctx_param(input_fn: &ItemFn) -> Option<&Type> {
    input_fn.sig.inputs.iter().find_map(|arg| {
        if let FnArg::Typed(PatType { pat, ty, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                if ident.ident == "ctx" {
                    return Some(ty.as_ref());
                }
            }
        }
        None
    })
}

/// Declared return type (e.g., `Result<(), kube::Error>`)
fn result_return(input_fn: &ItemFn) -> Option<&Type> {
    match &input_fn.sig.output {
        ReturnType::Type(_, ty) => Some(ty.as_ref()),
        ReturnType::Default => None,
    }
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(input_fn: &ItemFn, registry: Option<&syn::Path>) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    let Some(ctx_ty) = ctx_param(input_fn) else {
        // No ctx parameter - just wrap with tokio::test
        return quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                #fn_block
            }
        };
    };

    let test_body = match result_return(input_fn) {
        Some(ret_ty) => quote! {
            let result: #ret_ty = (async move #fn_block).await;
            result.map_err(|e| -> ::operator_harness::BoxError { e.into() })
        },
        None => quote! {
            (async move #fn_block).await;
            Ok::<(), ::operator_harness::BoxError>(())
        },
    };

    let registry = match registry {
        Some(path) => quote! { #path() },
        None => quote! { ::operator_harness::ReconcilerRegistry::new() },
    };

    quote! {
        #(#fn_attrs)*
        #[tokio::test(flavor = "multi_thread")]
        #fn_vis async fn #fn_name() {
            ::operator_harness::telemetry::init_logging();

            let config = ::operator_harness::HarnessConfig::from_env()
                .unwrap_or_else(|e| panic!("Invalid harness configuration: {}", e));
            let manager = ::operator_harness::ClusterSessionManager::new(config, #registry);

            let report = match ::operator_harness::Suite::new(module_path!(), manager)
                .test(stringify!(#fn_name), move |ctx: #ctx_ty| async move {
                    #test_body
                })
                .run()
                .await
            {
                Ok(report) => report,
                Err(::operator_harness::HarnessError::TeardownFailed { report, source }) => {
                    eprintln!("{}", report);
                    report.assert_passed();
                    panic!("Suite {} teardown failed: {}", module_path!(), source);
                }
                Err(e) => panic!("Suite {} failed: {}", module_path!(), e),
            };

            eprintln!("{}", report);
            report.assert_passed();
        }
    }
}
