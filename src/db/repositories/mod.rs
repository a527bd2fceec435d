mod confirmations;
