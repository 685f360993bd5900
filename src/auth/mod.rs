pub mod credentials;

pub use credentials::{
    ChainedCredentials, Credential, CredentialSource, EnvCredentials, JsonFileCredentials,
    StaticCredentials,
};
