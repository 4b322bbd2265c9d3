pub(crate) mod call_timer;
