mod backup;
mod cleanup;
mod forget;
mod progress;
mod status;
mod store;
