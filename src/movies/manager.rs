/// Movie persistence
use crate::{
    db::{self, versioning::apply_conditional_write},
    error::{ApiError, ApiResult},
    movies::{Filters, Metadata, Movie, Runtime},
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use std::time::Duration;

pub struct MovieManager {
    db: SqlitePool,
    query_timeout: Duration,
}

fn movie_from_row(row: &SqliteRow) -> Result<Movie, sqlx::Error> {
    let genres: String = row.try_get("genres")?;
    let genres: Vec<String> =
        serde_json::from_str(&genres).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Movie {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        runtime: Runtime(row.try_get("runtime")?),
        genres,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
    })
}

fn encode_genres(genres: &[String]) -> ApiResult<String> {
    serde_json::to_string(genres).map_err(|e| ApiError::Internal(format!("encode genres: {e}")))
}

impl MovieManager {
    pub fn new(db: SqlitePool, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    /// Store a new movie and fill in its id, creation time and version
    pub async fn insert(&self, movie: &mut Movie) -> ApiResult<()> {
        let genres = encode_genres(&movie.genres)?;

        let row = db::timed(
            self.query_timeout,
            "insert movie",
            sqlx::query(
                "INSERT INTO movies (created_at, title, year, runtime, genres)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id, version",
            )
            .bind(movie.created_at)
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.minutes())
            .bind(&genres)
            .fetch_one(&self.db),
        )
        .await?;

        movie.id = row.try_get("id")?;
        movie.version = row.try_get("version")?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> ApiResult<Option<Movie>> {
        if id < 1 {
            return Ok(None);
        }

        let row = db::timed(
            self.query_timeout,
            "get movie",
            sqlx::query(
                "SELECT id, created_at, title, year, runtime, genres, version
                 FROM movies WHERE id = ?1",
            )
            .bind(id)
            .fetch_optional(&self.db),
        )
        .await?;

        row.as_ref().map(movie_from_row).transpose().map_err(Into::into)
    }

    /// One page of movies matching `title` (case-insensitive substring,
    /// empty matches all) and containing every genre in `genres`.
    pub async fn list(
        &self,
        title: &str,
        genres: &[String],
        filters: &Filters,
    ) -> ApiResult<(Vec<Movie>, Metadata)> {
        let column = filters.sort_column()?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT count(*) OVER() AS total, id, created_at, title, year, runtime, genres, version
             FROM movies
             WHERE (instr(lower(title), lower(",
        );
        query.push_bind(title.to_string());
        query.push(")) > 0 OR ");
        query.push_bind(title.to_string());
        query.push(" = '')");

        for genre in genres {
            query.push(" AND EXISTS (SELECT 1 FROM json_each(movies.genres) WHERE json_each.value = ");
            query.push_bind(genre.clone());
            query.push(")");
        }

        query.push(format!(
            " ORDER BY {} {}, id ASC LIMIT ",
            column,
            filters.sort_direction()
        ));
        query.push_bind(filters.limit());
        query.push(" OFFSET ");
        query.push_bind(filters.offset());

        let rows = db::timed(
            self.query_timeout,
            "list movies",
            query.build().fetch_all(&self.db),
        )
        .await?;

        let mut total = 0i64;
        let mut movies = Vec::with_capacity(rows.len());
        for row in &rows {
            total = row.try_get("total")?;
            movies.push(movie_from_row(row)?);
        }

        Ok((movies, Metadata::calculate(total, filters.page, filters.page_size)))
    }

    /// Conditional write; the stored version must still equal `movie.version`
    pub async fn update(&self, movie: &mut Movie) -> ApiResult<()> {
        let genres = encode_genres(&movie.genres)?;

        let returned: Option<i64> = db::timed(
            self.query_timeout,
            "update movie",
            sqlx::query_scalar(
                "UPDATE movies
                 SET title = ?1, year = ?2, runtime = ?3, genres = ?4, version = version + 1
                 WHERE id = ?5 AND version = ?6
                 RETURNING version",
            )
            .bind(&movie.title)
            .bind(movie.year)
            .bind(movie.runtime.minutes())
            .bind(&genres)
            .bind(movie.id)
            .bind(movie.version)
            .fetch_optional(&self.db),
        )
        .await?;

        apply_conditional_write(movie, returned)
    }

    pub async fn delete(&self, id: i64) -> ApiResult<()> {
        if id < 1 {
            return Err(ApiError::NotFound);
        }

        let result = db::timed(
            self.query_timeout,
            "delete movie",
            sqlx::query("DELETE FROM movies WHERE id = ?1")
                .bind(id)
                .execute(&self.db),
        )
        .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movies::filters::MOVIE_SORT_SAFELIST;
    use chrono::Utc;

    fn movie(title: &str, year: i32, runtime: i32, genres: &[&str]) -> Movie {
        Movie {
            id: 0,
            title: title.to_string(),
            year,
            runtime: Runtime(runtime),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            version: 1,
            created_at: Utc::now(),
        }
    }

    fn filters(page: i64, page_size: i64, sort: &str) -> Filters {
        Filters {
            page,
            page_size,
            sort: sort.to_string(),
            sort_safelist: MOVIE_SORT_SAFELIST,
        }
    }

    async fn seeded() -> MovieManager {
        let manager = MovieManager::new(db::test_pool().await, Duration::from_secs(5));
        for mut m in [
            movie("Casablanca", 1942, 102, &["drama", "romance"]),
            movie("The Breakfast Club", 1985, 96, &["comedy", "drama"]),
            movie("Black Panther", 2018, 134, &["action", "adventure"]),
            movie("Deadpool", 2016, 108, &["action", "comedy"]),
        ] {
            manager.insert(&mut m).await.unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let manager = MovieManager::new(db::test_pool().await, Duration::from_secs(5));
        let mut m = movie("Moana", 2016, 107, &["animation", "adventure"]);
        manager.insert(&mut m).await.unwrap();
        assert!(m.id > 0);
        assert_eq!(m.version, 1);

        let stored = manager.get(m.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Moana");
        assert_eq!(stored.runtime, Runtime(107));
        assert_eq!(stored.genres, vec!["animation", "adventure"]);

        assert!(manager.get(9999).await.unwrap().is_none());
        assert!(manager.get(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_sorting() {
        let manager = seeded().await;

        let (all, meta) = manager.list("", &[], &filters(1, 20, "id")).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(meta.total, 4);
        assert_eq!(meta.last_page, 1);

        let (by_title, _) = manager.list("BLACK", &[], &filters(1, 20, "id")).await.unwrap();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].title, "Black Panther");

        let genres = vec!["action".to_string(), "comedy".to_string()];
        let (by_genre, _) = manager.list("", &genres, &filters(1, 20, "id")).await.unwrap();
        assert_eq!(by_genre.len(), 1);
        assert_eq!(by_genre[0].title, "Deadpool");

        let (newest, _) = manager.list("", &[], &filters(1, 20, "-year")).await.unwrap();
        let years: Vec<i32> = newest.iter().map(|m| m.year).collect();
        assert_eq!(years, vec![2018, 2016, 1985, 1942]);
    }

    #[tokio::test]
    async fn test_list_paging() {
        let manager = seeded().await;

        let (page, meta) = manager.list("", &[], &filters(2, 3, "runtime")).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "Black Panther");
        assert_eq!(meta.current_page, 2);
        assert_eq!(meta.last_page, 2);
        assert_eq!(meta.total, 4);

        let (empty, meta) = manager.list("", &[], &filters(5, 3, "id")).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(meta, Metadata::default());
    }

    #[tokio::test]
    async fn test_list_rejects_unsafe_sort() {
        let manager = seeded().await;
        let result = manager.list("", &[], &filters(1, 20, "title DESC; --")).await;
        assert!(matches!(result, Err(ApiError::Invariant(_))));
    }

    #[tokio::test]
    async fn test_update_versions() {
        let manager = seeded().await;
        let mut current = manager.get(1).await.unwrap().unwrap();
        let mut stale = current.clone();

        current.year = 1943;
        manager.update(&mut current).await.unwrap();
        assert_eq!(current.version, 2);

        stale.title = "Casablanca (remaster)".to_string();
        assert!(matches!(
            manager.update(&mut stale).await,
            Err(ApiError::EditConflict)
        ));

        let mut ghost = current.clone();
        ghost.version = 42;
        assert!(matches!(
            manager.update(&mut ghost).await,
            Err(ApiError::EditConflict)
        ));

        let stored = manager.get(1).await.unwrap().unwrap();
        assert_eq!(stored.year, 1943);
        assert_eq!(stored.title, "Casablanca");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let manager = seeded().await;
        manager.delete(2).await.unwrap();
        assert!(manager.get(2).await.unwrap().is_none());
        assert!(matches!(manager.delete(2).await, Err(ApiError::NotFound)));
        assert!(matches!(manager.delete(-1).await, Err(ApiError::NotFound)));
    }
}
