/*
 * Metrics and health HTTP endpoints
 */

use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{ContentType, Header};
use rocket::{get, routes, Request, Response, State};
use std::sync::Arc;
use crate::observability::Metrics;

pub struct ApiState {
    pub metrics: Arc<Metrics>,
}

#[get("/metrics")]
pub fn metrics(state: &State<ApiState>) -> (ContentType, String) {
    (ContentType::Plain, state.metrics.render())
}

#[get("/health")]
pub fn health_check() -> &'static str {
    "OK"
}

/// Dashboard clients poll from the browser, so every response carries a
/// permissive origin header.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _req: &'r Request<'_>, res: &mut Response<'r>) {
        res.set_header(Header::new("Access-Control-Allow-Origin", "*"));
    }
}

#[must_use]
pub fn create_rocket(state: ApiState, port: u16) -> rocket::Rocket<rocket::Build> {
    let config = rocket::Config {
        port,
        address: std::net::IpAddr::from([0, 0, 0, 0]),
        ..rocket::Config::default()
    };

    rocket::custom(config)
        .manage(state)
        .attach(Cors)
        .mount("/", routes![metrics, health_check])
}
