pub mod covid;
pub mod lib_http;
