// Telegram Bot API client (HTTPS, optionally through a SOCKS5 proxy).

pub mod bot_api_client;

pub use bot_api_client::TelegramBotClient;
