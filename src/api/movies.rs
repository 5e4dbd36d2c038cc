/// Movie catalog endpoints
use crate::{
    api::extract::{expected_version, parse_id, read_csv, read_int, read_string, JsonBody},
    auth::Identity,
    context::AppContext,
    error::{ApiError, ApiResult},
    movies::{
        filters::{validate_filters, MOVIE_SORT_SAFELIST},
        validate_movie, CreateMovieRequest, Filters, UpdateMovieRequest,
    },
    validation::Validator,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::collections::HashMap;

/// `GET /api/v1/movies`
pub async fn list_movies(
    State(ctx): State<AppContext>,
    Query(qs): Query<HashMap<String, String>>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut v = Validator::new();

    let title = read_string(&qs, "title", "");
    let genres = read_csv(&qs, "genres");
    let filters = Filters {
        page: read_int(&qs, "page", 1, &mut v),
        page_size: read_int(&qs, "page_size", 20, &mut v),
        sort: read_string(&qs, "sort", "id"),
        sort_safelist: MOVIE_SORT_SAFELIST,
    };

    validate_filters(&mut v, &filters);
    v.into_result()?;

    let (movies, metadata) = ctx.movies.list(&title, &genres, &filters).await?;
    Ok(Json(json!({ "movies": movies, "metadata": metadata })))
}

/// `POST /api/v1/movies`
pub async fn create_movie(
    State(ctx): State<AppContext>,
    identity: Identity,
    JsonBody(input): JsonBody<CreateMovieRequest>,
) -> ApiResult<impl IntoResponse> {
    let (mut movie, genres_provided) = input.into_movie();

    let mut v = Validator::new();
    v.check(genres_provided, "genres", "must be provided");
    validate_movie(&mut v, &movie);
    v.into_result()?;

    ctx.movies.insert(&mut movie).await?;
    tracing::info!(
        movie_id = movie.id,
        user_id = identity.user().map(|u| u.id),
        "movie created"
    );

    let location = format!("/api/v1/movies/{}", movie.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(json!({ "movie": movie })),
    ))
}

/// `GET /api/v1/movies/:id`
pub async fn show_movie(
    State(ctx): State<AppContext>,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_id(&raw_id)?;
    let movie = ctx.movies.get(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "movie": movie })))
}

/// `PATCH /api/v1/movies/:id/edit`
///
/// Writes back with the version that was read, so a concurrent edit
/// between read and write surfaces as `409`. Clients may pin the version
/// they last saw with `X-Expected-Version`.
pub async fn update_movie(
    State(ctx): State<AppContext>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    JsonBody(input): JsonBody<UpdateMovieRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_id(&raw_id)?;
    let expected = expected_version(&headers)?;

    let mut movie = ctx.movies.get(id).await?.ok_or(ApiError::NotFound)?;
    if let Some(expected) = expected {
        if expected != movie.version {
            crate::metrics::record_edit_conflict("movie");
            return Err(ApiError::EditConflict);
        }
    }

    input.apply(&mut movie);

    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.into_result()?;

    ctx.movies.update(&mut movie).await?;
    Ok(Json(json!({ "movie": movie })))
}

/// `DELETE /api/v1/movies/:id/delete`
pub async fn delete_movie(
    State(ctx): State<AppContext>,
    identity: Identity,
    Path(raw_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = parse_id(&raw_id)?;
    ctx.movies.delete(id).await?;
    tracing::info!(
        movie_id = id,
        user_id = identity.user().map(|u| u.id),
        "movie deleted"
    );
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}
