use axum::{
	Router, middleware,
	routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::core::middleware::{optional_auth, require_auth};
use crate::core::{app::App, export};
use crate::{auth, ws};

fn init_public(app: App) -> Router<App> {
	Router::new()
		.route("/auth/{db}/signin", post(auth::handler::post_signin))
		.route("/auth/{db}/signup", post(auth::handler::post_signup))
		.route("/auth/{db}/signout", post(auth::handler::post_signout))
		.route("/auth/{db}/change_password", post(auth::handler::post_change_password))
		.route("/auth/{db}/update", post(auth::handler::post_update))
		.route("/auth/{db}/delete", post(auth::handler::post_delete))
		.route("/auth/{db}/reset_password", post(auth::handler::post_reset_password))
		.route("/auth/{db}/verify_email", post(auth::handler::post_verify_email))
		.route("/auth/{db}/state", get(auth::handler::get_state))
		.route("/auth/{db}/oauth/{provider}/init", get(auth::oauth::get_oauth_init))
		.route("/auth/{db}/oauth/{provider}/signin", get(auth::oauth::get_oauth_signin))
		.route("/ws/{db}", get(ws::get_ws))
		.route_layer(middleware::from_fn_with_state(app, optional_auth))
}

fn init_protected(app: App) -> Router<App> {
	Router::new()
		.route("/export/{db}/{*path}", get(export::get_export))
		.route_layer(middleware::from_fn_with_state(app, require_auth))
}

pub fn init(app: App) -> Router {
	Router::new()
		.merge(init_public(app.clone()))
		.merge(init_protected(app.clone()))
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

// vim: ts=4
