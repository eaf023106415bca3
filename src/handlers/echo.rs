use warp::{Filter, Rejection, Reply};

use crate::core::echo::{echo, EchoRequest};

/// `POST /echo` with `{ "message": ... }`
pub fn echo_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("echo")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .map(|request: EchoRequest| warp::reply::json(&echo(request)))
}
