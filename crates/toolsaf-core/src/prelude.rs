pub use crate::strng;
pub use crate::strng::Strng;
pub use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
pub use std::fmt;
pub use std::fmt::{Display, Formatter};
pub use std::str::FromStr;
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
