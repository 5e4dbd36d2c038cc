/// API routes and handlers
pub mod extract;
pub mod health;
pub mod middleware;
pub mod movies;
pub mod tokens;
pub mod users;

use crate::{context::AppContext, permissions::Permission};
use axum::{
    handler::Handler,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post, put},
    Router,
};
use middleware::{require_permission, PermissionGate};

/// Build API routes
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let read = PermissionGate::new(ctx.clone(), Permission::MoviesRead);
    let write = PermissionGate::new(ctx.clone(), Permission::MoviesWrite);

    Router::new()
        .merge(health::routes())
        .route(
            "/api/v1/movies",
            get(movies::list_movies.layer(from_fn_with_state(read.clone(), require_permission)))
                .post(
                    movies::create_movie
                        .layer(from_fn_with_state(write.clone(), require_permission)),
                ),
        )
        .route(
            "/api/v1/movies/:id",
            get(movies::show_movie.layer(from_fn_with_state(read, require_permission))),
        )
        .route(
            "/api/v1/movies/:id/edit",
            patch(
                movies::update_movie.layer(from_fn_with_state(write.clone(), require_permission)),
            ),
        )
        .route(
            "/api/v1/movies/:id/delete",
            delete(movies::delete_movie.layer(from_fn_with_state(write, require_permission))),
        )
        .route("/api/v1/users/register", post(users::register_user))
        .route("/api/v1/users/activate", put(users::activate_user))
        .route("/api/v1/tokens/auth", post(tokens::create_authentication_token))
        .route(
            "/api/v1/tokens/password-reset/request",
            post(tokens::create_password_reset_token),
        )
        .route(
            "/api/v1/tokens/password-reset",
            put(users::update_user_password),
        )
}
