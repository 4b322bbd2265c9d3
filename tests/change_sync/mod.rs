mod delivery;
mod typed_delivery;
