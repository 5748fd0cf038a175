use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// Every test gets its own Rocket instance over a fresh in-memory store.
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// [`crate::model::store::Db`], and, for tests written as
/// `#[backend_test(admin)]` or `#[backend_test(voter)]`, the logged-in
/// [`crate::testing::Session`].
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Log in the client as admin/voter if needed.
    let login = parse_macro_input!(args as Option<Ident>);
    let maybe_login = match &login {
        Some(arg) if arg == "admin" => quote! {
            Some(crate::testing::login_admin(&rocket_client).await)
        },
        Some(arg) if arg == "voter" => quote! {
            Some(crate::testing::login_voter(&rocket_client).await)
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `admin` or `voter`")
                .into_compile_error()
                .into();
        }
        None => quote! { None },
    };

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), login.is_some()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// Test setup.
            async fn setup() -> (
                rocket::local::asynchronous::Client,
                crate::model::store::Db,
                Option<crate::testing::Session>,
            ) {
                crate::testing::init_logging();
                let db = crate::model::store::Db::memory();
                let rocket_client = rocket::local::asynchronous::Client::tracked(
                    crate::testing::rocket_for_store(db.clone()),
                )
                .await
                .unwrap();
                let session: Option<crate::testing::Session> = #maybe_login;
                (rocket_client, db, session)
            }

            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            // Setup, test and teardown all run inside the runtime so that the
            // client is dropped where its connections live.
            runtime.block_on(async move {
                #[allow(unused_variables)]
                let (rocket_client, db, session) = setup().await;
                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature, logged_in: bool) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_db = false;
    let mut has_session = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    // Valid as the last path segment for any type is itself
                    if let Some(segment) = type_path.path.segments.last() {
                        let type_ident = &segment.ident;
                        if type_ident == "Client" {
                            if has_client {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                                ));
                            }
                            has_client = true;
                            args.push(quote! { rocket_client });
                            continue;
                        } else if type_ident == "Db" {
                            if has_db {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `Db`",
                                ));
                            }
                            has_db = true;
                            args.push(quote! { db.clone() });
                            continue;
                        } else if type_ident == "Session" {
                            if !logged_in {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Only `#[backend_test(admin)]` or `#[backend_test(voter)]` tests can accept a `Session`",
                                ));
                            }
                            if has_session {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `Session`",
                                ));
                            }
                            has_session = true;
                            args.push(quote! { session.clone().unwrap() });
                            continue;
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `db_ident: Db` or `session_ident: Session`",
        ));
    }

    Ok(args)
}
