pub mod feedback_request;
pub mod feedback_response;
pub mod match_request;
pub mod query;

pub use feedback_request::FeedbackRequest;
pub use feedback_response::{FeedbackResponse, FeedbackStatus};
pub use match_request::RankRequest;
pub use query::{HistoryQuery, RetrainRequest, WindowQuery};
