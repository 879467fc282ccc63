pub mod add;
pub mod cat;
pub mod import;
pub mod init;
pub mod ls;
pub mod mkdir;
pub mod pull;
pub mod push;
pub mod rename;
pub mod rm;
pub mod update;
pub mod version;

pub use add::Add;
pub use cat::Cat;
pub use import::Import;
pub use init::Init;
pub use ls::Ls;
pub use mkdir::Mkdir;
pub use pull::Pull;
pub use push::Push;
pub use rename::Rename;
pub use rm::Rm;
pub use update::Update;
pub use version::Version;
