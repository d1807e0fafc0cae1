pub mod comment_server;
