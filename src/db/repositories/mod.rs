mod sessions;
mod watchers;
