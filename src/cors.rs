use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{Header, Status},
    Request, Response, Route,
};

use crate::config::Config;

/// Adds CORS headers to responses for browsers calling from an allowed origin.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let Some(origin) = req.headers().get_one("Origin") else {
            return;
        };
        let allowed = req
            .rocket()
            .state::<Config>()
            .map_or(false, |config| {
                config.allowed_origins().iter().any(|allowed| allowed == origin)
            });
        if !allowed {
            debug!("Not adding CORS headers for origin {origin}");
            return;
        }

        res.set_header(Header::new("Access-Control-Allow-Origin", origin.to_string()));
        res.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, PATCH, OPTIONS, DELETE",
        ));
        res.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));
        res.set_header(Header::new("Access-Control-Max-Age", "86400"));
        res.set_header(Header::new("Vary", "Origin"));
    }
}

/// Answers every preflight request; [`Cors`] adds the headers.
#[options("/<_..>")]
fn preflight() -> Status {
    Status::Ok
}

pub fn routes() -> Vec<Route> {
    routes![preflight]
}
