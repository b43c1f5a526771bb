pub(crate) mod ai_grading;
pub(crate) mod criteria;
pub(crate) mod grading_cache;
pub(crate) mod progress;
pub(crate) mod response_parser;
pub(crate) mod submissions;
