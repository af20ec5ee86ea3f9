mod conversion;
mod exchange_repository;
mod group_repository;
mod offer_repository;
mod platform_repository;

pub use conversion::{DBConvertible, DBFromConversionError, DBToConversionError};
pub use exchange_repository::ExchangeRepository;
pub use group_repository::GroupRepository;
pub use offer_repository::{validate_new_offer, OfferRepository};
pub use platform_repository::PlatformRepository;

pub(crate) use group_repository::{delete_member, insert_member, select_groups, select_groups_of};
pub(crate) use offer_repository::{
    delete_offer_rows, mark_accepted, select_offer, select_open_offer_ids_by_author,
};
pub(crate) use platform_repository::{select_course, select_user};
