mod concurrent_writers;
mod retry_bound;
