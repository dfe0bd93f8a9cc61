// Services module - business logic layer

pub mod cleancache;
pub mod imagecache;
pub mod nfo;
pub mod sync;
