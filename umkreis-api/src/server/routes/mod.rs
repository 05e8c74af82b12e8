use crate::server::ServerRouter;

mod posts;
mod search;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(posts::routes())
        .merge(search::routes())
}
