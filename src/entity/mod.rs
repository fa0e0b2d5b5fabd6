pub mod bot_configs;
pub mod messages;
pub mod products;
pub mod rooms;
pub mod tenants;
