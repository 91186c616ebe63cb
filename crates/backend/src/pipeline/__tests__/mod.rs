mod failures;
mod helpers;
mod indexing;
