mod common;
mod test_api;
mod test_cache;
mod test_fsm;
mod test_routing;
