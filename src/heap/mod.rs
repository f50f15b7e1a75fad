pub mod cluster;
pub mod combo_list;
pub mod extended_field;
pub mod model;
pub mod object_to_int_map;
pub mod ref_chain;
pub mod referenced_cluster;
