pub mod chat_handler;
