mod config;
mod database;
mod model;
mod oauth;

use actix_identity::{CookieIdentityPolicy, Identity, IdentityService};
use actix_web::{error, middleware::Logger, web, App, HttpResponse, HttpServer};
use config::Config;
use database::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};

type Tera = web::Data<tera::Tera>;
type Db = web::Data<sled::Db>;
type Conf = web::Data<Config>;

fn log_error<E: std::fmt::Debug>(err: E, message: &'static str) -> error::Error {
    debug!("{:?}", err);
    error::ErrorInternalServerError(message)
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found().header("location", location).finish()
}

fn forbidden() -> error::Error {
    error::ErrorForbidden("You need to be logged in to perform this action.")
}

#[derive(Serialize)]
struct MovieRow {
    id: u64,
    title: String,
    votes: u32,
    voted: bool,
    mine: bool,
}

fn render_vote_page(
    tera: &tera::Tera,
    db: &sled::Db,
    user: &str,
    notice: Option<&str>,
) -> actix_web::Result<HttpResponse> {
    let rows: Vec<MovieRow> = db
        .all_movies()
        .map_err(|err| log_error(err, "Database error"))?
        .into_iter()
        .map(|(id, movie)| MovieRow {
            id,
            voted: movie.has_voter(user),
            mine: movie.creator == user,
            title: movie.title,
            votes: movie.votes,
        })
        .collect();
    let mut ctx = tera::Context::new();
    ctx.insert("movies", &rows);
    ctx.insert("notice", &notice);
    let body = tera
        .render("vote.html", &ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

async fn index(id: Identity, tera: Tera) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    ctx.insert("logged_in", &id.identity().is_some());
    let body = tera
        .render("index.html", &ctx)
        .map_err(|err| log_error(err, "Template error"))?;
    Ok(HttpResponse::Ok().content_type("text/html").body(body))
}

async fn auth_start(config: Conf) -> actix_web::Result<HttpResponse> {
    let location = oauth::authorize_url(&config)
        .map_err(|err| log_error(err, "OAuth configuration error"))?;
    Ok(redirect(&location))
}

#[derive(Serialize, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

async fn auth_callback(
    params: web::Query<CallbackParams>,
    id: Identity,
    config: Conf,
) -> actix_web::Result<HttpResponse> {
    if let Some(err) = &params.error {
        debug!("provider refused the authorization: {}", err);
        return Ok(redirect("/"));
    }
    let code = match &params.code {
        Some(code) => code.clone(),
        None => return Ok(redirect("/")),
    };
    let config = config.get_ref().clone();
    match web::block(move || oauth::exchange_code(&config, &code)).await {
        Ok(user) => {
            info!("user {} logged in", user.login.as_deref().unwrap_or(&user.id));
            id.remember(user.id);
            Ok(redirect("/vote"))
        }
        Err(err) => {
            debug!("authentication failed: {:?}", err);
            Ok(redirect("/"))
        }
    }
}

async fn vote_page(id: Identity, tera: Tera, db: Db) -> actix_web::Result<HttpResponse> {
    let user = match id.identity() {
        Some(user) => user,
        None => return Ok(redirect("/")),
    };
    render_vote_page(&tera, &db, &user, None)
}

async fn vote_movie(
    path: web::Path<u64>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let user = id.identity().ok_or_else(forbidden)?;
    let movie_id = path.into_inner();
    match db
        .toggle_vote(movie_id, &user)
        .map_err(|err| log_error(err, "Database error"))?
    {
        VoteOutcome::Cast => {
            debug!("user {} voted for movie {}", user, movie_id);
            Ok(redirect("/vote"))
        }
        VoteOutcome::Retracted => {
            debug!("user {} retracted their vote for movie {}", user, movie_id);
            Ok(redirect("/vote"))
        }
        VoteOutcome::NotFound => Err(error::ErrorNotFound("Movie not found")),
    }
}

#[derive(Serialize, Deserialize)]
struct AddMovieParams {
    #[serde(rename = "movieName")]
    movie_name: String,
}

async fn add_movie(
    params: web::Form<AddMovieParams>,
    id: Identity,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let user = id.identity().ok_or_else(forbidden)?;
    let title = params.movie_name.trim();
    if title.is_empty() {
        return render_vote_page(&tera, &db, &user, Some("Movie title must not be empty."));
    }
    match db
        .add_movie(title, &user)
        .map_err(|err| log_error(err, "Database error"))?
    {
        SuggestOutcome::Created(movie_id) => {
            info!("user {} suggested movie {} ({:?})", user, movie_id, title);
            Ok(redirect("/vote"))
        }
        SuggestOutcome::AlreadySuggested => {
            render_vote_page(&tera, &db, &user, Some("You have already suggested a movie."))
        }
        SuggestOutcome::DuplicateTitle => render_vote_page(
            &tera,
            &db,
            &user,
            Some("A movie with that title already exists."),
        ),
    }
}

async fn delete_movie(
    path: web::Path<u64>,
    id: Identity,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let user = id.identity().ok_or_else(forbidden)?;
    let movie_id = path.into_inner();
    match db
        .remove_movie(movie_id, &user)
        .map_err(|err| log_error(err, "Database error"))?
    {
        DeleteOutcome::Deleted => {
            info!("user {} deleted movie {}", user, movie_id);
            Ok(redirect("/vote"))
        }
        DeleteOutcome::NotFound => Err(error::ErrorNotFound("Movie not found")),
        DeleteOutcome::NotCreator => Err(error::ErrorForbidden(
            "You are not authorized to delete this movie.",
        )),
    }
}

async fn logout(id: Identity) -> actix_web::Result<HttpResponse> {
    id.forget();
    Ok(redirect("/"))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/auth/42", web::get().to(auth_start))
        .route("/auth/42/callback", web::get().to(auth_callback))
        .route("/vote", web::get().to(vote_page))
        .route("/vote/{movie_id}", web::post().to(vote_movie))
        .route("/add-movie", web::post().to(add_movie))
        .route("/delete-movie/{movie_id}", web::get().to(delete_movie))
        .route("/logout", web::get().to(logout));
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "movienight=debug,actix_web=info");
    }
    env_logger::init();

    let config = Config::from_env();
    let db = sled::open(&config.database_path)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    let tera = tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

    let session_key = config.session_key;
    let address = format!("127.0.0.1:{}", config.port);
    let db = web::Data::new(db);
    let tera = web::Data::new(tera);
    let config = web::Data::new(config);

    info!("listening on {}", address);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityService::new(
                CookieIdentityPolicy::new(&session_key)
                    .name("auth-cookie")
                    .secure(false),
            ))
            .app_data(db.clone())
            .app_data(tera.clone())
            .app_data(config.clone())
            .configure(routes)
    })
    .bind(address.as_str())?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{header, StatusCode};
    use actix_web::test;

    fn test_config() -> Config {
        Config {
            port: 3000,
            database_path: "unused".to_owned(),
            client_id: "client-id".to_owned(),
            client_secret: "client-secret".to_owned(),
            callback_url: "http://localhost:3000/auth/42/callback".to_owned(),
            authorize_url: "https://provider.test/oauth/authorize".to_owned(),
            token_url: "https://provider.test/oauth/token".to_owned(),
            profile_url: "https://provider.test/v2/me".to_owned(),
            session_key: [0u8; 32],
        }
    }

    macro_rules! test_app {
        () => {
            test::init_service(
                App::new()
                    .wrap(IdentityService::new(
                        CookieIdentityPolicy::new(&[0u8; 32])
                            .name("auth-cookie")
                            .secure(false),
                    ))
                    .app_data(web::Data::new(
                        sled::Config::new().temporary(true).open().unwrap(),
                    ))
                    .app_data(web::Data::new(
                        tera::Tera::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"))
                            .unwrap(),
                    ))
                    .app_data(web::Data::new(test_config()))
                    .configure(routes),
            )
            .await
        };
    }

    fn location(resp: &actix_web::dev::ServiceResponse) -> &str {
        resp.headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
    }

    // What the identity middleware would have set after a login, built with
    // the same key the test app uses.
    fn session_cookie(user: &str) -> actix_web::cookie::Cookie<'static> {
        use actix_web::cookie::{Cookie, CookieJar, Key};
        let mut jar = CookieJar::new();
        jar.private(&Key::from_master(&[0u8; 32]))
            .add(Cookie::new("auth-cookie", user.to_owned()));
        jar.get("auth-cookie").unwrap().clone()
    }

    #[actix_rt::test]
    async fn landing_page_renders() {
        let mut app = test_app!();
        let resp =
            test::call_service(&mut app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("Log in"));
    }

    #[actix_rt::test]
    async fn vote_page_requires_a_session() {
        let mut app = test_app!();
        let resp =
            test::call_service(&mut app, test::TestRequest::get().uri("/vote").to_request()).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");
    }

    #[actix_rt::test]
    async fn voting_requires_a_session() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::post().uri("/vote/1").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn suggesting_requires_a_session() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::post()
                .uri("/add-movie")
                .header("content-type", "application/x-www-form-urlencoded")
                .set_payload("movieName=Dune")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn deleting_requires_a_session() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::get().uri("/delete-movie/1").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn login_redirects_to_the_provider() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::get().uri("/auth/42").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = location(&resp).to_owned();
        assert!(location.starts_with("https://provider.test/oauth/authorize"));
        assert!(location.contains("client_id=client-id"));
        assert!(location.contains("response_type=code"));
    }

    #[actix_rt::test]
    async fn callback_without_code_goes_back_to_the_landing_page() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::get()
                .uri("/auth/42/callback")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");
    }

    #[actix_rt::test]
    async fn callback_with_provider_error_goes_back_to_the_landing_page() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::get()
                .uri("/auth/42/callback?error=access_denied")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");
    }

    #[actix_rt::test]
    async fn non_numeric_movie_ids_are_not_found() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::post().uri("/vote/dune").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn a_session_cookie_opens_the_vote_page() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::get()
                .uri("/vote")
                .cookie(session_cookie("alice"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body)
            .unwrap()
            .contains("Suggest a New Movie"));
    }

    #[actix_rt::test]
    async fn suggesting_through_the_form_lists_the_movie() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::post()
                .uri("/add-movie")
                .cookie(session_cookie("alice"))
                .header("content-type", "application/x-www-form-urlencoded")
                .set_payload("movieName=Dune")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/vote");

        let resp = test::call_service(
            &mut app,
            test::TestRequest::get()
                .uri("/vote")
                .cookie(session_cookie("alice"))
                .to_request(),
        )
        .await;
        let body = test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("Dune - Votes: 1"));
        assert!(body.contains("Retract vote"));
        assert!(body.contains("/delete-movie/"));
    }

    #[actix_rt::test]
    async fn blank_titles_are_rejected_with_a_notice() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::post()
                .uri("/add-movie")
                .cookie(session_cookie("alice"))
                .header("content-type", "application/x-www-form-urlencoded")
                .set_payload("movieName=++")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("Movie title must not be empty."));
        // Nothing was stored; the listing still renders its empty state.
        assert!(body.contains("No suggestions yet."));
    }

    #[actix_rt::test]
    async fn logging_out_clears_the_session() {
        let mut app = test_app!();
        let resp = test::call_service(
            &mut app,
            test::TestRequest::get()
                .uri("/logout")
                .cookie(session_cookie("alice"))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(location(&resp), "/");
        let removal = resp
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        assert!(removal.starts_with("auth-cookie="));
    }
}
