//! services/api/src/bin/openapi.rs
//!
//! Dumps the OpenAPI specification to stdout, for committing alongside the
//! service or feeding client generators.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() {
    match ApiDoc::openapi().to_pretty_json() {
        Ok(spec) => println!("{spec}"),
        Err(e) => {
            eprintln!("failed to render OpenAPI spec: {e}");
            std::process::exit(1);
        }
    }
}
