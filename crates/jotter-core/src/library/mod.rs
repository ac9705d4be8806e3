//! Libraries: references, descriptors and the resolver chain.

pub mod cache;
pub mod definition;
pub mod descriptor;
pub mod embedded;
pub mod http;
pub mod parser;
pub mod reference;
pub mod repository;
pub mod resolver;
pub mod sources;

pub use cache::{CachedDescriptor, DiskCache};
pub use definition::{Extensions, LibraryDefinition, Resource, ResourceKind};
pub use descriptor::{GlobalOptions, LibraryDescriptor, Properties};
pub use embedded::EmbeddedLibraries;
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use parser::{parse_arguments, parse_request, parse_requests};
pub use reference::{LibraryReference, LibraryRequest, ResolutionStrategy, Variable};
pub use repository::{DescriptorRepository, GitHubRepository, RepositoryConfig};
pub use resolver::{Resolved, ResolverChain, ResolverChainBuilder};
pub use sources::{DescriptorSource, Fetched};
